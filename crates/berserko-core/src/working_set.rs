use dashmap::DashSet;
use tracing::debug;

use crate::scope::ScopeResolver;

/// Hosts against which Negotiate authentication has already been exercised.
///
/// Keys are the expanded, lower-cased host names. Only membership and insertion are
/// offered; callers never iterate.
#[derive(Debug, Default)]
pub struct WorkingSetCache {
    hosts: DashSet<String>,
}

impl WorkingSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, scope: &ScopeResolver<'_>, hostname: &str) -> bool {
        self.hosts.contains(&scope.canonical(hostname))
    }

    pub fn add(&self, scope: &ScopeResolver<'_>, hostname: &str) {
        if self.hosts.insert(scope.canonical(hostname)) {
            debug!(%hostname, "adding host to working set");
        }
    }

    pub fn reset(&self) {
        self.hosts.clear();
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::config::Config;

    fn example() -> Config {
        Config {
            domain: "example.com".into(),
            ..Config::default()
        }
    }

    #[test]
    fn membership_ignores_case_and_qualification() {
        let config = example();
        let scope = ScopeResolver::new(&config);
        let set = WorkingSetCache::new();

        set.add(&scope, "App");
        assert!(set.contains(&scope, "app.EXAMPLE.com"));
        assert!(set.contains(&scope, "APP"));

        set.add(&scope, "app.example.com");
        assert_eq!(set.len(), 1);

        set.reset();
        assert!(set.is_empty());
        assert!(!set.contains(&scope, "app"));
    }

    #[test]
    fn concurrent_adds_converge() {
        let set = Arc::new(WorkingSetCache::new());
        let spellings = ["web", "WEB", "Web.Example.Com", "web.example.com"];

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let set = Arc::clone(&set);
                let name = spellings[i % spellings.len()];
                thread::spawn(move || {
                    let config = example();
                    let scope = ScopeResolver::new(&config);
                    for _ in 0..100 {
                        set.add(&scope, name);
                        assert!(set.contains(&scope, name));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }

        let config = example();
        let scope = ScopeResolver::new(&config);
        assert_eq!(set.len(), 1);
        for name in spellings {
            assert!(set.contains(&scope, name));
        }
    }
}
