//! Pure upstream selection over a read-only mirror snapshot.
//!
//! No I/O, no locking — the health tracker is the only writer of the
//! snapshot this operates over (see `mirror::MirrorRegistry`).

use crate::mirror::MirrorRecord;

/// Result of selecting an upstream for an incoming sub-path.
pub struct Selection {
    pub mirror: MirrorRecord,
    /// The sub-path to forward upstream, with any matched route prefix
    /// stripped.
    pub adjusted_path: String,
}

/// Select the best upstream mirror for `path` (everything after `/v2/`,
/// possibly empty): the longest matching `route_prefix` among selectable
/// mirrors, falling back to the first prefix-less mirror, then to a
/// synthetic Docker Hub mirror if nothing is selectable at all.
pub fn select_upstream(snapshot: &[MirrorRecord], path: &str) -> Selection {
    let mut selectable: Vec<&MirrorRecord> = snapshot.iter().filter(|m| m.is_selectable()).collect();
    selectable.sort_by_key(|m| m.latency_ms);

    if let Some((mirror, adjusted)) = longest_prefix_match(&selectable, path) {
        return Selection {
            mirror: mirror.clone(),
            adjusted_path: adjusted,
        };
    }

    if let Some(mirror) = selectable.iter().find(|m| m.route_prefix.is_none()) {
        return Selection {
            mirror: (*mirror).clone(),
            adjusted_path: path.to_string(),
        };
    }

    Selection {
        mirror: MirrorRecord::fallback(),
        adjusted_path: path.to_string(),
    }
}

/// Find the longest `route_prefix` matching `path`, ties broken by lower
/// latency (mirrors are pre-sorted ascending by latency, so among equal
/// prefix lengths the first match encountered wins).
fn longest_prefix_match<'a>(
    selectable: &[&'a MirrorRecord],
    path: &str,
) -> Option<(&'a MirrorRecord, String)> {
    let mut best: Option<(&MirrorRecord, usize, &str)> = None;

    for mirror in selectable {
        let Some(prefix) = mirror.route_prefix.as_deref() else {
            continue;
        };

        let matched = if path == prefix {
            Some("")
        } else if let Some(rest) = path.strip_prefix(prefix) {
            rest.strip_prefix('/')
        } else {
            None
        };

        let Some(rest) = matched else {
            continue;
        };

        if best.map(|(_, len, _)| prefix.len() > len).unwrap_or(true) {
            best = Some((mirror, prefix.len(), rest));
        }
    }

    best.map(|(mirror, _, rest)| (mirror, rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorRecord;

    fn mirror(name: &str, latency: u32, prefix: Option<&str>) -> MirrorRecord {
        let mut m = MirrorRecord::new(name, format!("https://{name}.example"));
        m.latency_ms = latency;
        m.route_prefix = prefix.map(str::to_string);
        m
    }

    #[test]
    fn path_transparency_for_empty_prefix_mirror() {
        let snap = vec![mirror("hub", 10, None)];
        let sel = select_upstream(&snap, "library/alpine/manifests/latest");
        assert_eq!(sel.mirror.name, "hub");
        assert_eq!(sel.adjusted_path, "library/alpine/manifests/latest");
    }

    #[test]
    fn prefix_stripping() {
        let snap = vec![mirror("ghcr", 10, Some("ghcr"))];
        let sel = select_upstream(&snap, "ghcr/o/r/manifests/v1");
        assert_eq!(sel.mirror.name, "ghcr");
        assert_eq!(sel.adjusted_path, "o/r/manifests/v1");
    }

    #[test]
    fn prefix_exact_match_strips_to_empty() {
        let snap = vec![mirror("ghcr", 10, Some("ghcr"))];
        let sel = select_upstream(&snap, "ghcr");
        assert_eq!(sel.adjusted_path, "");
    }

    #[test]
    fn longest_prefix_wins() {
        let snap = vec![mirror("a", 10, Some("a")), mirror("ab", 20, Some("a/b"))];
        let sel = select_upstream(&snap, "a/b/c");
        assert_eq!(sel.mirror.name, "ab");
        assert_eq!(sel.adjusted_path, "c");
    }

    #[test]
    fn empty_path_falls_back_to_generic_mirror() {
        let snap = vec![mirror("ghcr", 10, Some("ghcr")), mirror("hub", 50, None)];
        let sel = select_upstream(&snap, "");
        assert_eq!(sel.mirror.name, "hub");
        assert_eq!(sel.adjusted_path, "");
    }

    #[test]
    fn selectable_ordering_picks_lowest_latency() {
        let snap = vec![mirror("slow", 200, None), mirror("fast", 50, None)];
        let sel = select_upstream(&snap, "x");
        assert_eq!(sel.mirror.name, "fast");
    }

    #[test]
    fn unreachable_mirror_excluded_then_next_best_chosen() {
        let mut snap = vec![mirror("fast", 50, None), mirror("slow", 200, None)];
        snap[0].enabled = false;
        let sel = select_upstream(&snap, "x");
        assert_eq!(sel.mirror.name, "slow");
    }

    #[test]
    fn no_selectable_mirrors_yields_synthetic_fallback() {
        let snap: Vec<MirrorRecord> = vec![];
        let sel = select_upstream(&snap, "library/alpine/manifests/latest");
        assert_eq!(sel.mirror.url, "https://registry-1.docker.io");
        assert_eq!(sel.adjusted_path, "library/alpine/manifests/latest");
    }
}
