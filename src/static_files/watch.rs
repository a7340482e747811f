use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::StaticFileCache;

/// Watch `root` recursively and invalidate cached entries as files are
/// created, changed, renamed or removed.
///
/// The returned watcher must be kept alive for as long as invalidation is
/// wanted; dropping it stops the notifications.
///
/// # Errors
///
/// Returns an error if the platform watcher cannot be created or `root`
/// cannot be watched.
pub fn watch<P: AsRef<Path>>(
    root: P,
    cache: Arc<StaticFileCache>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                for path in &event.paths {
                    debug!(path = %path.display(), kind = ?event.kind, "Static file changed");
                    cache.invalidate(path);
                }
            }
        }
        Err(e) => warn!(error = %e, "Static file watch error"),
    })?;
    watcher.watch(root.as_ref(), RecursiveMode::Recursive)?;
    Ok(watcher)
}
