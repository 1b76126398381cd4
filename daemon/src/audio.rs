/// Per-process audio sessions on the default render endpoint (WASAPI).
///
/// The reconciliation loop only needs two things from the audio stack: the
/// list of processes that currently own a session, and a way to flip the mute
/// flag of every session a process owns.
///
/// On non-Windows platforms [`SystemAudio`] compiles but every call returns
/// [`BackendError::Unsupported`].
use crate::error::BackendError;

/// One live audio session, labelled with its owning process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSession {
    pub pid: u32,
    pub name: String,
}

pub trait AudioSessionBackend {
    /// Lists the sessions currently alive. A process with several sessions
    /// (one per stream) may appear more than once.
    fn enumerate_sessions(&mut self) -> Result<Vec<AudioSession>, BackendError>;

    /// Sets the mute flag on every session owned by `pid`.
    fn set_mute(&mut self, pid: u32, muted: bool) -> Result<(), BackendError>;
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::collections::HashMap;

    use windows::core::Interface;
    use windows::Win32::Foundation::BOOL;
    use windows::Win32::Media::Audio::{
        eMultimedia, eRender, IAudioSessionControl2, IAudioSessionManager2,
        IMMDeviceEnumerator, ISimpleAudioVolume, MMDeviceEnumerator,
    };
    use windows::Win32::System::Com::{CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_MULTITHREADED};

    use super::{AudioSession, AudioSessionBackend};
    use crate::error::BackendError;
    use crate::process::ProcessNames;

    /// WASAPI session backend. COM objects are thread-affine, so this must be
    /// created and used on the monitor thread.
    pub struct SystemAudio {
        enumerator: IMMDeviceEnumerator,
        /// Volume handles from the last enumeration, grouped by owning pid.
        volumes: HashMap<u32, Vec<ISimpleAudioVolume>>,
        names: ProcessNames,
    }

    impl SystemAudio {
        pub fn new() -> Result<Self, BackendError> {
            unsafe {
                // COM must be initialised on this thread; S_FALSE (already
                // initialised) is fine.
                let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
                let enumerator: IMMDeviceEnumerator =
                    CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                        .map_err(|e| BackendError::os("CoCreateInstance(MMDeviceEnumerator)", e))?;
                Ok(Self {
                    enumerator,
                    volumes: HashMap::new(),
                    names: ProcessNames::new(),
                })
            }
        }

        /// Re-reads every session on the default render endpoint. The endpoint
        /// is looked up each time so a device switch is picked up.
        fn refresh(&mut self) -> Result<(), BackendError> {
            let mut volumes: HashMap<u32, Vec<ISimpleAudioVolume>> = HashMap::new();
            unsafe {
                let device = self
                    .enumerator
                    .GetDefaultAudioEndpoint(eRender, eMultimedia)
                    .map_err(|e| BackendError::os("GetDefaultAudioEndpoint", e))?;
                let manager: IAudioSessionManager2 = device
                    .Activate(CLSCTX_ALL, None)
                    .map_err(|e| BackendError::os("Activate(IAudioSessionManager2)", e))?;
                let sessions = manager
                    .GetSessionEnumerator()
                    .map_err(|e| BackendError::os("GetSessionEnumerator", e))?;
                let count = sessions
                    .GetCount()
                    .map_err(|e| BackendError::os("IAudioSessionEnumerator::GetCount", e))?;

                for i in 0..count {
                    // A session can vanish between GetCount and GetSession; skip it.
                    let Ok(control) = sessions.GetSession(i) else { continue };
                    let Ok(control2) = control.cast::<IAudioSessionControl2>() else { continue };
                    let Ok(pid) = control2.GetProcessId() else { continue };
                    // pid 0 is the system-sounds session.
                    if pid == 0 {
                        continue;
                    }
                    let Ok(volume) = control.cast::<ISimpleAudioVolume>() else { continue };
                    volumes.entry(pid).or_default().push(volume);
                }
            }
            self.volumes = volumes;
            Ok(())
        }
    }

    impl AudioSessionBackend for SystemAudio {
        fn enumerate_sessions(&mut self) -> Result<Vec<AudioSession>, BackendError> {
            self.refresh()?;
            let pids: Vec<u32> = self.volumes.keys().copied().collect();
            self.names.refresh(&pids);

            let mut sessions = Vec::new();
            for (&pid, volumes) in &self.volumes {
                // A pid with no resolvable name already exited; leave it out
                // so the liveness sweep sees it as gone.
                let Some(name) = self.names.name_of(pid) else { continue };
                for _ in volumes {
                    sessions.push(AudioSession { pid, name: name.clone() });
                }
            }
            Ok(sessions)
        }

        fn set_mute(&mut self, pid: u32, muted: bool) -> Result<(), BackendError> {
            if !self.volumes.contains_key(&pid) {
                self.refresh()?;
            }
            let volumes = self
                .volumes
                .get(&pid)
                .ok_or(BackendError::SessionNotFound(pid))?;
            for volume in volumes {
                unsafe {
                    volume
                        .SetMute(BOOL::from(muted), std::ptr::null())
                        .map_err(|e| BackendError::os("ISimpleAudioVolume::SetMute", e))?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(windows)]
pub use imp::SystemAudio;

// ── Non-Windows stub ──────────────────────────────────────────────────────────

#[cfg(not(windows))]
pub struct SystemAudio;

#[cfg(not(windows))]
impl SystemAudio {
    pub fn new() -> Result<Self, BackendError> {
        Ok(SystemAudio)
    }
}

#[cfg(not(windows))]
impl AudioSessionBackend for SystemAudio {
    fn enumerate_sessions(&mut self) -> Result<Vec<AudioSession>, BackendError> {
        Err(BackendError::Unsupported("Audio session control (WASAPI)"))
    }

    fn set_mute(&mut self, _pid: u32, _muted: bool) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("Audio session control (WASAPI)"))
    }
}
