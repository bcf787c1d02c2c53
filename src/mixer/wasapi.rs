//! WASAPI mixer backend
//!
//! Every operation initializes COM on the calling thread and works on
//! fresh interfaces, so the sink holds no COM pointers and stays
//! `Send + Sync`.

use tracing::{debug, trace};
use windows::core::{Interface, Result as WinResult};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::{CloseHandle, S_OK};
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::{
    eAll, eCapture, eConsole, eMultimedia, eRender, EDataFlow, IAudioSessionControl2,
    IAudioSessionManager2, IMMDevice, IMMDeviceEnumerator, ISimpleAudioVolume,
    MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_MULTITHREADED, STGM_READ,
};
use windows::Win32::System::ProcessStatus::GetModuleBaseNameW;
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use super::console::SYSTEM_SESSION;
use super::{SessionRecord, VolumeSink};
use crate::error::MixerError;

/// Volume sink backed by the default Windows render endpoint
#[derive(Debug, Default)]
pub struct WasapiMixer;

/// Render session with its volume control
struct Session {
    pid: u32,
    system: bool,
    volume: ISimpleAudioVolume,
}

impl WasapiMixer {
    pub fn new() -> Self {
        Self
    }

    fn enumerator() -> Result<IMMDeviceEnumerator, MixerError> {
        // S_FALSE when this thread already joined the MTA
        let _ = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(|e| MixerError::Unavailable(format!("device enumerator: {}", e)))
    }

    fn default_render() -> Result<IMMDevice, MixerError> {
        let enumerator = Self::enumerator()?;
        unsafe { enumerator.GetDefaultAudioEndpoint(eRender, eMultimedia) }
            .map_err(|e| MixerError::Unavailable(format!("default output device: {}", e)))
    }

    fn sessions() -> Result<Vec<Session>, MixerError> {
        let device = Self::default_render()?;
        Self::collect_sessions(&device).map_err(operation)
    }

    fn collect_sessions(device: &IMMDevice) -> WinResult<Vec<Session>> {
        let mut sessions = Vec::new();
        unsafe {
            let manager: IAudioSessionManager2 = device.Activate(CLSCTX_ALL, None)?;
            let list = manager.GetSessionEnumerator()?;
            for i in 0..list.GetCount()? {
                let control = list.GetSession(i)?;
                let control2: IAudioSessionControl2 = control.cast()?;
                sessions.push(Session {
                    pid: control2.GetProcessId()?,
                    system: control2.IsSystemSoundsSession() == S_OK,
                    volume: control.cast()?,
                });
            }
        }
        Ok(sessions)
    }

    /// Active endpoints in the given data flow as (friendly name, device)
    fn endpoints(flow: EDataFlow) -> Result<Vec<(String, IMMDevice)>, MixerError> {
        let enumerator = Self::enumerator()?;
        let mut found = Vec::new();
        unsafe {
            let collection = enumerator
                .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
                .map_err(operation)?;
            for i in 0..collection.GetCount().map_err(operation)? {
                let device = collection.Item(i).map_err(operation)?;
                match friendly_name(&device) {
                    Ok(name) => found.push((name, device)),
                    Err(e) => debug!("Skipping endpoint {} without a name: {}", i, e),
                }
            }
        }
        Ok(found)
    }

    fn set_endpoint_volume(device: &IMMDevice, volume: f64) -> WinResult<()> {
        unsafe {
            let endpoint: IAudioEndpointVolume = device.Activate(CLSCTX_ALL, None)?;
            endpoint.SetMasterVolumeLevelScalar(volume as f32, std::ptr::null())
        }
    }
}

impl VolumeSink for WasapiMixer {
    fn list_sessions(&self) -> Result<Vec<SessionRecord>, MixerError> {
        let sessions = Self::sessions()?;

        let mut records = vec![SessionRecord::new(0, SYSTEM_SESSION)];
        for session in sessions.iter().filter(|s| !s.system) {
            match process_name(session.pid) {
                Some(name) => records.push(SessionRecord::new(session.pid, name)),
                None => trace!("No process name for session pid {}", session.pid),
            }
        }
        Ok(records)
    }

    fn set_master_volume(&self, volume: f64) -> Result<(), MixerError> {
        let device = Self::default_render()?;
        Self::set_endpoint_volume(&device, volume).map_err(operation)
    }

    fn set_system_sounds_volume(&self, volume: f64) -> Result<(), MixerError> {
        let session = Self::sessions()?
            .into_iter()
            .find(|s| s.system)
            .ok_or_else(|| MixerError::Operation("no system sounds session".into()))?;
        unsafe { session.volume.SetMasterVolume(volume as f32, std::ptr::null()) }
            .map_err(operation)
    }

    fn set_session_volume(&self, pid: u32, volume: f64) -> Result<(), MixerError> {
        // One process can own several sessions
        let matching: Vec<Session> = Self::sessions()?
            .into_iter()
            .filter(|s| s.pid == pid && !s.system)
            .collect();
        if matching.is_empty() {
            return Err(MixerError::Operation(format!("no session with pid {}", pid)));
        }
        for session in matching {
            unsafe { session.volume.SetMasterVolume(volume as f32, std::ptr::null()) }
                .map_err(operation)?;
        }
        Ok(())
    }

    fn output_devices(&self) -> Result<Vec<String>, MixerError> {
        Ok(Self::endpoints(eRender)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    fn set_device_volume(&self, device: &str, volume: f64) -> Result<(), MixerError> {
        let (_, endpoint) = Self::endpoints(eAll)?
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(device))
            .ok_or_else(|| MixerError::Operation(format!("no device named '{}'", device)))?;
        Self::set_endpoint_volume(&endpoint, volume).map_err(operation)
    }

    fn default_capture_device(&self) -> Result<Option<String>, MixerError> {
        let enumerator = Self::enumerator()?;
        // No capture device at all is reported as an error by WASAPI
        match unsafe { enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) } {
            Ok(device) => friendly_name(&device).map(Some).map_err(operation),
            Err(e) => {
                debug!("No default capture device: {}", e);
                Ok(None)
            }
        }
    }
}

fn operation(e: windows::core::Error) -> MixerError {
    MixerError::Operation(e.to_string())
}

fn friendly_name(device: &IMMDevice) -> WinResult<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ)?;
        let prop = store.GetValue(&PKEY_Device_FriendlyName)?;
        Ok(String::from_utf16_lossy(
            prop.Anonymous.Anonymous.Anonymous.pwszVal.as_wide(),
        ))
    }
}

/// Executable name of a process, `None` when it cannot be opened
fn process_name(pid: u32) -> Option<String> {
    unsafe {
        let handle =
            OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid).ok()?;
        let mut buf = [0u16; 260];
        let len = GetModuleBaseNameW(handle, None, &mut buf) as usize;
        let _ = CloseHandle(handle);
        if len == 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buf[..len]))
    }
}
