//! App-lifecycle and window-focus event sources.
//!
//! The host platform owns the real signals (app foreground/background,
//! window focus/blur) and forwards them by calling the `emit_*` methods.
//! Engines subscribe to revalidate on resume or focus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::listeners::{ListenerSet, Subscription};

struct LifecycleInner {
    in_foreground: AtomicBool,
    resume: ListenerSet<()>,
    pause: ListenerSet<()>,
}

/// Delivers `resume`/`pause` notifications from the host application.
#[derive(Clone)]
pub struct LifecycleSource {
    inner: Arc<LifecycleInner>,
}

impl Default for LifecycleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                in_foreground: AtomicBool::new(true),
                resume: ListenerSet::new(),
                pause: ListenerSet::new(),
            }),
        }
    }

    /// The process-wide source. Hosts embedding several isolated query
    /// stacks (or tests) should construct their own with [`new`](Self::new).
    pub fn global() -> &'static LifecycleSource {
        static GLOBAL: OnceLock<LifecycleSource> = OnceLock::new();
        GLOBAL.get_or_init(LifecycleSource::new)
    }

    pub fn is_in_foreground(&self) -> bool {
        self.inner.in_foreground.load(Ordering::SeqCst)
    }

    /// Host signal: the application returned to the foreground.
    pub fn emit_resume(&self) {
        debug!("app lifecycle: resume");
        self.inner.in_foreground.store(true, Ordering::SeqCst);
        self.inner.resume.emit(&());
    }

    /// Host signal: the application moved to the background.
    pub fn emit_pause(&self) {
        debug!("app lifecycle: pause");
        self.inner.in_foreground.store(false, Ordering::SeqCst);
        self.inner.pause.emit(&());
    }

    pub fn on_resume(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.resume.subscribe(move |_| callback())
    }

    pub fn on_pause(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.pause.subscribe(move |_| callback())
    }
}

struct FocusInner {
    supported: bool,
    focus: ListenerSet<()>,
    blur: ListenerSet<()>,
}

/// Delivers window focus/blur notifications on platforms that have windows.
#[derive(Clone)]
pub struct WindowFocusSource {
    inner: Arc<FocusInner>,
}

impl WindowFocusSource {
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// A source for platforms without window focus; engines skip their
    /// focus wiring against it.
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            inner: Arc::new(FocusInner {
                supported,
                focus: ListenerSet::new(),
                blur: ListenerSet::new(),
            }),
        }
    }

    /// The process-wide source.
    pub fn global() -> &'static WindowFocusSource {
        static GLOBAL: OnceLock<WindowFocusSource> = OnceLock::new();
        GLOBAL.get_or_init(WindowFocusSource::new)
    }

    pub fn is_supported(&self) -> bool {
        self.inner.supported
    }

    /// Host signal: the window gained focus.
    pub fn emit_focus(&self) {
        if !self.inner.supported {
            return;
        }
        debug!("window focus gained");
        self.inner.focus.emit(&());
    }

    /// Host signal: the window lost focus.
    pub fn emit_blur(&self) {
        if !self.inner.supported {
            return;
        }
        debug!("window focus lost");
        self.inner.blur.emit(&());
    }

    pub fn on_focus(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.focus.subscribe(move |_| callback())
    }

    pub fn on_blur(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.blur.subscribe(move |_| callback())
    }
}

impl Default for WindowFocusSource {
    fn default() -> Self {
        Self::new()
    }
}
