//! Port resolution.
//!
//! The game increments its listening port when the configured one is taken,
//! so the client scans a fixed window of candidates before giving up. The
//! algorithm is a pure function over an injected probe so it can be tested
//! without sockets.

use std::future::Future;

use tracing::debug;

/// Number of candidate ports probed, starting at the configured port.
pub const PORT_SCAN_WINDOW: u16 = 10;

/// A successful scan outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPort {
    /// The live port.
    pub port: u16,
    /// True when the port only answered on the final retry of the
    /// configured port, after the whole window was dead. The server was
    /// likely still binding, so its socket listener deserves extra grace.
    pub via_fallback: bool,
}

/// Scan `base, base+1, ..., base+window-1` with `probe`, returning the
/// first live port.
///
/// When the whole window is dead the configured port gets one final retry,
/// the server may have still been binding while the sweep passed it.
pub async fn resolve_port<F, Fut>(base: u16, window: u16, probe: F) -> Option<ResolvedPort>
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = bool>,
{
    for offset in 0..window {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        debug!(port, "probing candidate port");
        if probe(port).await {
            return Some(ResolvedPort {
                port,
                via_fallback: false,
            });
        }
    }

    debug!(port = base, "scan window exhausted, retrying configured port");
    if probe(base).await {
        Some(ResolvedPort {
            port: base,
            via_fallback: true,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn finds_the_first_live_port_in_the_window() {
        let resolved = resolve_port(61423, PORT_SCAN_WINDOW, |port| async move {
            port == 61432
        })
        .await;
        assert_eq!(
            resolved,
            Some(ResolvedPort {
                port: 61432,
                via_fallback: false,
            })
        );
    }

    #[tokio::test]
    async fn prefers_the_configured_port_when_live() {
        let probes = AtomicU32::new(0);
        let resolved = resolve_port(61423, PORT_SCAN_WINDOW, |_| {
            probes.fetch_add(1, Ordering::SeqCst);
            async { true }
        })
        .await;
        assert_eq!(resolved.map(|r| r.port), Some(61423));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_to_the_configured_port_after_a_dead_window() {
        // Dead during the sweep, alive on the final retry of the base port.
        let probes = AtomicU32::new(0);
        let resolved = resolve_port(61423, PORT_SCAN_WINDOW, |port| {
            let attempt = probes.fetch_add(1, Ordering::SeqCst);
            async move { port == 61423 && attempt >= u32::from(PORT_SCAN_WINDOW) }
        })
        .await;
        assert_eq!(
            resolved,
            Some(ResolvedPort {
                port: 61423,
                via_fallback: true,
            })
        );
        assert_eq!(probes.load(Ordering::SeqCst), u32::from(PORT_SCAN_WINDOW) + 1);
    }

    #[tokio::test]
    async fn reports_failure_when_everything_is_dead() {
        let probes = AtomicU32::new(0);
        let resolved = resolve_port(61423, PORT_SCAN_WINDOW, |_| {
            probes.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;
        assert_eq!(resolved, None);
        // full window plus the fallback retry
        assert_eq!(probes.load(Ordering::SeqCst), u32::from(PORT_SCAN_WINDOW) + 1);
    }

    #[tokio::test]
    async fn window_never_wraps_past_the_port_range() {
        let resolved = resolve_port(u16::MAX - 2, PORT_SCAN_WINDOW, |_| async { false }).await;
        assert_eq!(resolved, None);
    }
}
