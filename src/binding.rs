use {
    parking_lot::Mutex,
    slab::Slab,
    std::{
        fmt::{self, Debug},
        sync::{Arc, Weak},
    },
};

type Listener = Box<dyn FnOnce() + Send>;

struct Listeners {
    destroyed: bool,
    slab: Slab<Listener>,
}

struct LifetimeInner {
    listeners: Mutex<Listeners>,
}

impl LifetimeInner {
    fn fire(&self) {
        let listeners = {
            let mut listeners = self.listeners.lock();
            if listeners.destroyed {
                return;
            }
            listeners.destroyed = true;
            std::mem::replace(&mut listeners.slab, Slab::new())
        };

        for (_, listener) in listeners {
            listener();
        }
    }
}

impl Drop for LifetimeInner {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Destruction notifier owned by an object of the host application.
///
/// Bindings attached to the lifetime fire once,
/// either on [`Lifetime::destroy`] or when the last clone is dropped.
#[derive(Clone)]
pub struct Lifetime {
    inner: Arc<LifetimeInner>,
}

impl Debug for Lifetime {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Lifetime")
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifetime {
    pub fn new() -> Self {
        Lifetime {
            inner: Arc::new(LifetimeInner {
                listeners: Mutex::new(Listeners {
                    destroyed: false,
                    slab: Slab::new(),
                }),
            }),
        }
    }

    /// Signals destruction of the owner.
    /// Subsequent calls are no-ops.
    pub fn destroy(&self) {
        self.inner.fire();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.listeners.lock().destroyed
    }

    /// Returns weak reference that does not keep the owner alive.
    pub fn downgrade(&self) -> WeakLifetime {
        WeakLifetime {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning reference to a [`Lifetime`].
#[derive(Clone)]
pub struct WeakLifetime {
    inner: Weak<LifetimeInner>,
}

impl Debug for WeakLifetime {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("WeakLifetime")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl From<&Lifetime> for WeakLifetime {
    fn from(lifetime: &Lifetime) -> Self {
        lifetime.downgrade()
    }
}

/// Subscription that runs a release action when the observed object is destroyed.
///
/// Holds no strong reference to the object.
pub struct ReferenceBinding {
    lifetime: Weak<LifetimeInner>,
    index: usize,
}

impl Debug for ReferenceBinding {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ReferenceBinding")
            .field("index", &self.index)
            .finish()
    }
}

impl ReferenceBinding {
    /// Attaches `on_destroy` to the lifetime.
    ///
    /// If object is already gone `on_destroy` is returned back
    /// so that caller may run it immediately.
    pub fn attach<F>(lifetime: &WeakLifetime, on_destroy: F) -> Result<Self, F>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = match lifetime.inner.upgrade() {
            Some(inner) => inner,
            None => return Err(on_destroy),
        };

        let mut listeners = inner.listeners.lock();
        if listeners.destroyed {
            return Err(on_destroy);
        }
        let index = listeners.slab.insert(Box::new(on_destroy));
        drop(listeners);

        Ok(ReferenceBinding {
            lifetime: lifetime.inner.clone(),
            index,
        })
    }

    /// Unsubscribes without running the action.
    pub fn detach(self) {
        if let Some(inner) = self.lifetime.upgrade() {
            let mut listeners = inner.listeners.lock();
            if !listeners.destroyed && listeners.slab.contains(self.index) {
                drop(listeners.slab.remove(self.index));
            }
        }
    }
}
