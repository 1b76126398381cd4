use std::collections::{BTreeSet, HashSet};

use crate::audio::AudioSession;
use crate::registry::ProcessAudioRegistry;

/// Returns the live sessions that should be tracked automatically: those whose
/// process name is in `history` and whose pid is not tracked yet.
///
/// Names compare ASCII case-insensitively, the same rule
/// [`Config::remember`](crate::config::Config::remember) uses. Several
/// processes sharing one remembered name are all returned; a pid owning more
/// than one session is returned once.
pub fn find_new_matches(
    live: &[AudioSession],
    history: &BTreeSet<String>,
    tracked: &ProcessAudioRegistry,
) -> Vec<(u32, String)> {
    if history.is_empty() {
        return Vec::new();
    }
    let wanted: HashSet<String> = history.iter().map(|n| n.to_ascii_lowercase()).collect();
    let mut seen = HashSet::new();

    live.iter()
        .filter(|s| !tracked.contains(s.pid))
        .filter(|s| wanted.contains(&s.name.to_ascii_lowercase()))
        .filter(|s| seen.insert(s.pid))
        .map(|s| (s.pid, s.name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(pid: u32, name: &str) -> AudioSession {
        AudioSession {
            pid,
            name: name.to_string(),
        }
    }

    fn history(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn matches_remembered_names_only() {
        let live = vec![session(100, "game.exe"), session(200, "chrome.exe")];
        let matches = find_new_matches(&live, &history(&["game.exe"]), &ProcessAudioRegistry::new());
        assert_eq!(matches, vec![(100, "game.exe".to_string())]);
    }

    #[test]
    fn skips_already_tracked_pids() {
        let live = vec![session(100, "game.exe")];
        let mut tracked = ProcessAudioRegistry::new();
        tracked.add(100, "game.exe");
        assert!(find_new_matches(&live, &history(&["game.exe"]), &tracked).is_empty());
    }

    #[test]
    fn returns_every_instance_of_a_name() {
        let live = vec![session(100, "game.exe"), session(101, "game.exe")];
        let matches = find_new_matches(&live, &history(&["game.exe"]), &ProcessAudioRegistry::new());
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn pid_with_several_sessions_is_returned_once() {
        let live = vec![session(100, "game.exe"), session(100, "game.exe")];
        let matches = find_new_matches(&live, &history(&["game.exe"]), &ProcessAudioRegistry::new());
        assert_eq!(matches, vec![(100, "game.exe".to_string())]);
    }

    #[test]
    fn name_match_ignores_case() {
        let live = vec![session(100, "Game.EXE")];
        let matches = find_new_matches(&live, &history(&["game.exe"]), &ProcessAudioRegistry::new());
        assert_eq!(matches, vec![(100, "Game.EXE".to_string())]);
    }

    #[test]
    fn case_folding_agrees_with_remember() {
        let mut config = crate::config::Config::default();
        config.remember("ÉCRAN.exe");
        // `remember` treats this as a different name, so auto-match must too.
        assert!(config.remember("écran.exe"));

        let only_upper = history(&["ÉCRAN.exe"]);
        let live = vec![session(100, "écran.exe"), session(200, "Écran.EXE")];
        let matches = find_new_matches(&live, &only_upper, &ProcessAudioRegistry::new());
        assert_eq!(matches, vec![(200, "Écran.EXE".to_string())]);
    }

    #[test]
    fn empty_history_matches_nothing() {
        let live = vec![session(100, "game.exe")];
        assert!(find_new_matches(&live, &BTreeSet::new(), &ProcessAudioRegistry::new()).is_empty());
    }
}
