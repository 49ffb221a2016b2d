/// Process environment isolation for tests that read `APIWATCH_*` overrides.
pub mod env {
    use std::collections::HashMap;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use once_cell::sync::Lazy;

    use crate::config::{
        ENV_ENABLE_EVENT_QUEUE, ENV_INITIAL_DELAY_MS, ENV_RETRY_AFTER_MS,
        ENV_RETRY_ON_UPSTREAM_ERROR,
    };

    const OVERRIDES: [&str; 4] = [
        ENV_ENABLE_EVENT_QUEUE,
        ENV_INITIAL_DELAY_MS,
        ENV_RETRY_ON_UPSTREAM_ERROR,
        ENV_RETRY_AFTER_MS,
    ];

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    /// Holds the env lock; every key touched through it is restored on drop.
    pub struct ScopedEnv {
        _lock: MutexGuard<'static, ()>,
        original: HashMap<String, Option<String>>,
    }

    /// Lock the environment with every config override unset.
    pub fn isolated() -> ScopedEnv {
        let mut scoped = ScopedEnv {
            _lock: ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner),
            original: HashMap::new(),
        };
        for key in OVERRIDES {
            scoped.unset(key);
        }
        scoped
    }

    impl ScopedEnv {
        fn touch(&mut self, key: &str) {
            self.original
                .entry(key.to_string())
                .or_insert_with(|| std::env::var(key).ok());
        }

        pub fn set(&mut self, key: &str, value: &str) {
            self.touch(key);
            std::env::set_var(key, value);
        }

        pub fn unset(&mut self, key: &str) {
            self.touch(key);
            std::env::remove_var(key);
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            for (key, value) in self.original.drain() {
                match value {
                    Some(v) => std::env::set_var(&key, v),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}
