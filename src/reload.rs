//! Live MAC table and the triggers that rebuild it

use crate::error::Result;
use crate::mac_table::{self, MacTable};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Holds the table the listener reads from.
///
/// Tables are only ever replaced whole, so a reader gets either the previous
/// or the new table.
#[derive(Debug, Default)]
pub struct TableSlot {
    /// (generation that built it, table)
    current: RwLock<(u64, Arc<MacTable>)>,
}

impl TableSlot {
    /// Create a slot with `table` live
    pub fn new(table: MacTable) -> Self {
        Self {
            current: RwLock::new((0, Arc::new(table))),
        }
    }

    /// Snapshot of the live table.
    pub fn load(&self) -> Arc<MacTable> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current.1)
    }

    /// Install `table` unless a newer generation is already live.
    ///
    /// Returns whether the table was installed.
    pub fn install(&self, generation: u64, table: MacTable) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if generation < current.0 {
            return false;
        }
        *current = (generation, Arc::new(table));
        true
    }
}

/// Rebuilds the live table from a definitions directory.
#[derive(Debug)]
pub struct Reloader {
    dir: PathBuf,
    slot: Arc<TableSlot>,
    generation: AtomicU64,
}

impl Reloader {
    /// Create a reloader that fills `slot` from `dir`
    pub fn new(dir: impl Into<PathBuf>, slot: Arc<TableSlot>) -> Self {
        Self {
            dir: dir.into(),
            slot,
            generation: AtomicU64::new(0),
        }
    }

    /// Get the definitions directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build a fresh table and make it live.
    ///
    /// On error the previous table stays live. When reloads overlap, the one
    /// started last wins regardless of completion order.
    pub async fn reload(&self) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(dir = %self.dir.display(), "Loading MAC addresses");

        let table = mac_table::build(&self.dir).await?;
        for (mac, id) in table.iter() {
            debug!(mac = %mac, vm_id = %id, "MAC table entry");
        }
        let entries = table.len();

        if self.slot.install(generation, table) {
            info!(entries, generation, "MAC table reloaded");
        } else {
            debug!(generation, "Discarding table from superseded reload");
        }
        Ok(())
    }

    /// Reload, logging instead of returning failure.
    pub async fn reload_logged(&self) {
        if let Err(e) = self.reload().await {
            error!(error = %e, "MAC table reload failed, keeping previous table");
        }
    }

    /// Reload on every change in the definitions directory and on SIGHUP.
    ///
    /// If the directory cannot be watched, SIGHUP remains the only trigger.
    pub async fn watch(self: Arc<Self>) -> Result<()> {
        let (tx, mut changes) = mpsc::unbounded_channel();
        let watcher = match spawn_dir_watcher(&self.dir, tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                error!(dir = %self.dir.display(), error = %e, "Cannot watch VM definitions, reload with SIGHUP");
                None
            }
        };
        let mut watching = watcher.is_some();
        let mut hangup = signal(SignalKind::hangup())?;

        loop {
            tokio::select! {
                change = changes.recv(), if watching => {
                    if change.is_none() {
                        warn!("Definitions watcher stopped");
                        watching = false;
                        continue;
                    }
                    // Editors and the cluster filesystem emit bursts; one rebuild covers them.
                    while changes.try_recv().is_ok() {}
                    info!("Detected change in VM definitions, reloading");
                }
                sig = hangup.recv() => {
                    if sig.is_none() {
                        return Ok(());
                    }
                    info!("Got SIGHUP, reloading MAC table");
                }
            }

            let reloader = Arc::clone(&self);
            tokio::spawn(async move { reloader.reload_logged().await });
        }
    }
}

/// Watch `dir` (non-recursively) and send a unit on every event.
fn spawn_dir_watcher(dir: &Path, tx: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(_) => {
            let _ = tx.send(());
        }
        Err(e) => warn!(error = %e, "Definitions watch error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MacAddr, VmId};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    fn table(entries: &[(&str, u32)]) -> MacTable {
        MacTable::from_records(entries.iter().map(|(m, id)| (mac(m), VmId::new(*id))))
    }

    #[test]
    fn install_replaces_whole_table() {
        let slot = TableSlot::new(table(&[("02:00:00:00:00:01", 1)]));
        let before = slot.load();

        assert!(slot.install(1, table(&[("02:00:00:00:00:02", 2)])));
        let after = slot.load();

        // The old snapshot is untouched by the swap.
        assert_eq!(before.lookup(&mac("02:00:00:00:00:01")), Some(VmId::new(1)));
        assert_eq!(before.len(), 1);
        assert_eq!(after.lookup(&mac("02:00:00:00:00:01")), None);
        assert_eq!(after.lookup(&mac("02:00:00:00:00:02")), Some(VmId::new(2)));
    }

    #[test]
    fn older_generation_does_not_overwrite_newer() {
        let slot = TableSlot::default();
        assert!(slot.install(2, table(&[("02:00:00:00:00:02", 2)])));
        assert!(!slot.install(1, table(&[("02:00:00:00:00:01", 1)])));
        assert_eq!(slot.load().lookup(&mac("02:00:00:00:00:02")), Some(VmId::new(2)));
    }

    #[test]
    fn readers_only_see_complete_tables() {
        let small = table(&[("02:00:00:00:00:01", 1)]);
        let big = MacTable::from_records(
            (0..=255u8).map(|i| (MacAddr::new([2, 0, 0, 0, 1, i]), VmId::new(i as u32))),
        );
        let slot = Arc::new(TableSlot::new(small));

        let writer = {
            let slot = Arc::clone(&slot);
            let big = big.clone();
            std::thread::spawn(move || {
                for generation in 1..200 {
                    let next = if generation % 2 == 0 {
                        table(&[("02:00:00:00:00:01", 1)])
                    } else {
                        big.clone()
                    };
                    slot.install(generation, next);
                }
            })
        };

        for _ in 0..2000 {
            let seen = slot.load();
            assert!(seen.len() == 1 || seen.len() == 256, "saw {} entries", seen.len());
        }
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn reload_picks_up_new_definitions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("100.conf"), "net0: virtio=02:00:00:00:00:01\n").unwrap();

        let slot = Arc::new(TableSlot::default());
        let reloader = Reloader::new(dir.path(), Arc::clone(&slot));
        reloader.reload().await.unwrap();
        assert_eq!(slot.load().len(), 1);

        fs::write(dir.path().join("101.conf"), "net0: virtio=02:00:00:00:00:02\n").unwrap();
        reloader.reload().await.unwrap();
        assert_eq!(slot.load().lookup(&mac("02:00:00:00:00:02")), Some(VmId::new(101)));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_table() {
        let dir = TempDir::new().unwrap();
        let defs = dir.path().join("defs");
        fs::create_dir(&defs).unwrap();
        fs::write(defs.join("100.conf"), "net0: virtio=02:00:00:00:00:01\n").unwrap();

        let slot = Arc::new(TableSlot::default());
        let reloader = Reloader::new(&defs, Arc::clone(&slot));
        reloader.reload().await.unwrap();

        fs::remove_dir_all(&defs).unwrap();
        assert!(reloader.reload().await.is_err());
        assert_eq!(slot.load().lookup(&mac("02:00:00:00:00:01")), Some(VmId::new(100)));
    }

    #[tokio::test]
    async fn directory_change_triggers_reload() {
        let dir = TempDir::new().unwrap();
        let slot = Arc::new(TableSlot::default());
        let reloader = Arc::new(Reloader::new(dir.path(), Arc::clone(&slot)));
        reloader.reload().await.unwrap();
        assert!(slot.load().is_empty());

        let watch = tokio::spawn(Arc::clone(&reloader).watch());
        // Give the watcher time to register before touching the directory.
        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::write(dir.path().join("100.conf"), "net0: virtio=02:00:00:00:00:01\n").unwrap();

        let target = mac("02:00:00:00:00:01");
        let mut found = false;
        for _ in 0..50 {
            if slot.load().lookup(&target).is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        watch.abort();
        assert!(found, "table was not reloaded after directory change");
    }

    #[tokio::test]
    async fn sighup_triggers_reload() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        use tokio::signal::unix::{signal, SignalKind};

        // Keep a SIGHUP handler installed so the signal never hits the default action.
        let _hangup = signal(SignalKind::hangup()).unwrap();

        // A directory that does not exist yet cannot be watched, leaving SIGHUP
        // as the only trigger.
        let dir = TempDir::new().unwrap();
        let defs = dir.path().join("defs");
        let slot = Arc::new(TableSlot::default());
        let reloader = Arc::new(Reloader::new(&defs, Arc::clone(&slot)));

        let watch = tokio::spawn(Arc::clone(&reloader).watch());
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::create_dir(&defs).unwrap();
        fs::write(defs.join("100.conf"), "net0: virtio=02:00:00:00:00:01\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(slot.load().is_empty());

        kill(Pid::this(), Signal::SIGHUP).unwrap();

        let target = mac("02:00:00:00:00:01");
        let mut found = false;
        for _ in 0..50 {
            if slot.load().lookup(&target) == Some(VmId::new(100)) {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        watch.abort();
        assert!(found, "table was not reloaded after SIGHUP");
    }
}
