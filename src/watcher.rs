//! Device map watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::binding::Disconnect;
use crate::device::MidiDevice;
use crate::map_spec::DeviceMap;
use crate::target::TargetSystem;

/// Wait for editors to finish writing before re-reading
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches a device map file and yields each successfully reloaded map
///
/// A reload naming a different device than the initial map is rejected;
/// switching hardware needs a restart.
pub struct MapWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<DeviceMap>,
}

impl MapWatcher {
    /// Load `path` and start watching it. Must be called inside a Tokio runtime.
    pub async fn new(path: impl Into<PathBuf>) -> Result<(Self, DeviceMap)> {
        let path = path.into();
        let (tx, rx) = mpsc::channel(10);

        let initial = DeviceMap::from_file(&path)
            .with_context(|| format!("Failed to load device map {}", path.display()))?;
        let device_name = initial.device_name.clone();

        // notify calls back on its own thread, outside the runtime
        let runtime_handle = tokio::runtime::Handle::current();
        let map_path = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                debug!("Device map changed: {:?}", event.paths);

                let (path, tx, device_name) = (map_path.clone(), tx.clone(), device_name.clone());
                runtime_handle.spawn(async move {
                    tokio::time::sleep(DEBOUNCE).await;
                    reload(&path, &device_name, &tx).await;
                });
            }
            Err(e) => error!("Watch error: {}", e),
        })?;

        watcher
            .watch(Path::new(&path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch device map {}", path.display()))?;

        info!("Watching device map {}", path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial,
        ))
    }

    /// Wait for the next reloaded map; `None` once the watcher is gone
    pub async fn next_map(&mut self) -> Option<DeviceMap> {
        self.rx.recv().await
    }
}

async fn reload(path: &Path, device_name: &str, tx: &mpsc::Sender<DeviceMap>) {
    let map = match DeviceMap::from_file(path) {
        Ok(map) => map,
        Err(e) => {
            warn!("Failed to reload device map (keeping old mappings): {}", e);
            return;
        }
    };

    if map.device_name != device_name {
        warn!(
            "Reloaded map names device '{}' but '{}' is open; restart to switch devices",
            map.device_name, device_name
        );
        return;
    }

    info!("Device map reloaded ({} mappings)", map.mappings.len());
    if let Err(e) = tx.send(map).await {
        error!("Failed to deliver reloaded map: {}", e);
    }
}

/// Swap the live bindings of `device` for those of `reloaded`.
///
/// `bindings` belongs to `current` and is disconnected first. If `reloaded`
/// fails to resolve, `current` is connected again and stays the active map.
/// Returns the handle for whichever map ends up bound.
pub fn apply_reload(
    device: &MidiDevice,
    core: &Arc<dyn TargetSystem>,
    current: &mut DeviceMap,
    bindings: Disconnect,
    reloaded: DeviceMap,
) -> Disconnect {
    if let Err(e) = bindings.disconnect() {
        warn!("Failed to disconnect previous bindings: {}", e);
    }

    match reloaded.connect_to_core(core, device) {
        Ok(handle) => {
            info!("Applied reloaded device map");
            *current = reloaded;
            handle
        }
        Err(e) => {
            error!("Reloaded map rejected, restoring previous mappings: {}", e);
            current.connect_to_core(core, device).unwrap_or_else(|e| {
                error!("Failed to restore previous mappings: {}", e);
                Disconnect::noop()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::XTouchMini;
    use crate::map_spec::Mapping;
    use crate::midi::MidiMessage;
    use crate::target::memory::SimulatedCore;
    use crate::transport::memory::{MemoryPort, MemoryTransport};
    use std::fs;
    use tempfile::TempDir;

    fn open_rig() -> (MemoryPort, MidiDevice, Arc<SimulatedCore>, Arc<dyn TargetSystem>) {
        let transport = MemoryTransport::new();
        let port = transport.add_port(XTouchMini::DEVICE_NAME);
        let device = XTouchMini::open(&transport).unwrap().into_inner();
        let core = Arc::new(SimulatedCore::demo());
        let target: Arc<dyn TargetSystem> = core.clone();
        (port, device, core, target)
    }

    fn knob_turn(control: u8, value: u8) -> MidiMessage {
        MidiMessage::ControlChange { channel: 10, control, value }
    }

    fn gain_on(control: u8) -> DeviceMap {
        let mapping = Mapping::property("knob", control, "Camera", "Gain").unwrap();
        DeviceMap::new(XTouchMini::DEVICE_NAME, vec![mapping])
    }

    #[test]
    fn test_apply_reload_swaps_bindings() {
        let (port, device, core, target) = open_rig();
        let mut current = gain_on(2);
        let bindings = current.connect_to_core(&target, &device).unwrap();

        let bindings = apply_reload(&device, &target, &mut current, bindings, gain_on(5));
        assert_eq!(current, gain_on(5));
        assert!(bindings.is_connected());

        // Old knob is released, new knob drives the property
        port.inject(knob_turn(2, 127));
        assert_eq!(core.get_property("Camera", "Gain").unwrap(), "0");
        port.inject(knob_turn(5, 127));
        assert_eq!(core.get_property("Camera", "Gain").unwrap(), "8");

        bindings.disconnect().unwrap();
        assert!(core.property_changed().is_empty());
    }

    #[test]
    fn test_apply_reload_restores_previous_map_on_failure() {
        let (port, device, core, target) = open_rig();
        let mut current = gain_on(2);
        let bindings = current.connect_to_core(&target, &device).unwrap();

        let broken = DeviceMap::new(
            XTouchMini::DEVICE_NAME,
            vec![
                Mapping::property("knob", 5, "Camera", "Exposure").unwrap(),
                Mapping::property("button", 9, "Stage", "Speed").unwrap(),
            ],
        );
        let bindings = apply_reload(&device, &target, &mut current, bindings, broken);
        assert_eq!(current, gain_on(2));
        assert!(bindings.is_connected());

        // Knob 5 from the rejected map was rolled back
        port.inject(knob_turn(5, 127));
        assert_eq!(core.get_property("Camera", "Exposure").unwrap(), "10");

        // Knob 2 is bound again, exactly once
        assert_eq!(core.property_changed().len(), 1);
        port.inject(knob_turn(2, 0));
        assert_eq!(core.get_property("Camera", "Gain").unwrap(), "-5");
    }

    const INITIAL: &str = "device_name: X-TOUCH MINI\nmappings:\n  - [knob, 2, Camera, Gain]\n";

    #[tokio::test]
    async fn test_map_watcher_reloads() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("map.yaml");
        fs::write(&path, INITIAL)?;

        let (mut watcher, map) = MapWatcher::new(&path).await?;
        assert_eq!(map.mappings.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let updated = format!("{INITIAL}  - [button, 10, null, null, snap]\n");
        fs::write(&path, updated)?;

        let reloaded = tokio::time::timeout(Duration::from_secs(2), watcher.next_map())
            .await?
            .expect("watcher closed without a reload");
        assert_eq!(reloaded.mappings.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_reload_rejects_other_device() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("map.yaml");
        fs::write(&path, "device_name: Launchpad\nmappings: []\n").unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        reload(&path, "X-TOUCH MINI", &tx).await;
        assert!(rx.try_recv().is_err());

        reload(&path, "Launchpad", &tx).await;
        assert_eq!(rx.try_recv().unwrap().device_name, "Launchpad");
    }

    #[tokio::test]
    async fn test_reload_keeps_old_map_on_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("map.yaml");
        fs::write(&path, "device_name: [unterminated").unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        reload(&path, "X-TOUCH MINI", &tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(MapWatcher::new(temp_dir.path().join("absent.yaml")).await.is_err());
    }
}
