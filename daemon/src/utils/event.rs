use log::error;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

#[doc(hidden)]
pub type SyncCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// 生成唯一 ID
#[doc(hidden)]
pub fn generate_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn log_panic(panic_value: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic_value.downcast_ref::<String>() {
        format!("Panic message: {}", msg)
    } else if let Some(msg) = panic_value.downcast_ref::<&str>() {
        format!("Panic message: {}", msg)
    } else {
        format!("Panic value type_id={:?}", (*panic_value).type_id())
    }
}

#[doc(hidden)]
#[derive(Clone)]
pub struct ListenerWrapper<T> {
    pub id: u64,
    pub callback: SyncCallback<T>,
}

/// Runs one listener; a panicking listener is logged and does not stop the
/// remaining listeners from running.
#[doc(hidden)]
pub fn call_listener<T>(event: &str, wrapper: &ListenerWrapper<T>, args: T) {
    let callback = &wrapper.callback;
    if let Err(panic_value) = panic::catch_unwind(AssertUnwindSafe(|| callback(args))) {
        error!(
            "listener #{} of {} panicked: {}",
            wrapper.id,
            event,
            log_panic(panic_value)
        );
    }
}

/// Declares an event type whose listeners run synchronously, in
/// registration order, before `invoke` returns.
#[macro_export]
macro_rules! event_decl {
    ($event_name:ident, $($arg_name:ident : $arg_type:ty),*) => {
        pub struct $event_name {
            listeners: std::sync::Mutex<Vec<$crate::utils::event::ListenerWrapper<($($arg_type),*)>>>,
        }

        impl $event_name {
            pub fn new() -> Self {
                Self {
                    listeners: std::sync::Mutex::new(Vec::new()),
                }
            }

            pub fn add_listener<F>(&self, callback: F) -> u64
            where
                F: Fn($($arg_type),*) + Send + Sync + 'static,
            {
                let id = $crate::utils::event::generate_id();
                let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
                listeners.push($crate::utils::event::ListenerWrapper {
                    id,
                    callback: std::sync::Arc::new(move |args: ($($arg_type),*)| {
                        let ($($arg_name),*) = args;
                        callback($($arg_name),*);
                    }),
                });
                id
            }

            pub fn remove_listener(&self, id: u64) -> bool {
                let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
                match listeners.iter().position(|w| w.id == id) {
                    Some(pos) => {
                        listeners.remove(pos);
                        true
                    }
                    None => false,
                }
            }

            pub fn listener_count(&self) -> usize {
                self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
            }

            pub fn invoke(&self, $($arg_name: $arg_type),*) {
                // listeners may register or remove listeners themselves
                let snapshot = {
                    let guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
                    guard.clone()
                };

                for wrapper in snapshot.iter() {
                    $crate::utils::event::call_listener(
                        stringify!($event_name),
                        wrapper,
                        ($($arg_name.clone()),*),
                    );
                }
            }
        }

        impl Default for $event_name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}
