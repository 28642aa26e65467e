//! Shared fixtures for the integration tests.
//!
//! [`MockProvider`] stands in for the page-global verification library. Each
//! render pops the next scripted [`Behavior`] (falling back to a default) and
//! settles the challenge callbacks accordingly, optionally after a delay.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use turnstile_broker::{
    BrokerConfig, BrokerError, ChallengeCallbacks, ChallengeProvider, Document, ElementId,
    MemoryDocument, RenderOptions, TimeProviderFn, TokenBroker, WidgetHandle,
};

pub const SITE_KEY: &str = "0x4AAAAAAATEST";

/// What the provider does with one render call.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Issue `token-<n>` after `delay`
    Succeed(Duration),
    /// Invoke the error callback after `delay`
    Fail(Duration),
    /// Invoke the timeout callback after `delay`
    Timeout(Duration),
    /// Never settle
    Hang,
    /// Reject the render call itself
    RenderError,
}

pub struct MockProvider {
    ready: AtomicBool,
    document: Arc<MemoryDocument>,
    script: Mutex<VecDeque<Behavior>>,
    fallback: Mutex<Behavior>,
    renders: AtomicUsize,
    removed: Mutex<Vec<WidgetHandle>>,
    rendered: Mutex<Vec<(ElementId, RenderOptions)>>,
    decorate: AtomicBool,
}

impl MockProvider {
    pub fn new(document: Arc<MemoryDocument>) -> Arc<Self> {
        let provider = Arc::new(Self {
            ready: AtomicBool::new(false),
            document: Arc::clone(&document),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Behavior::Succeed(Duration::from_millis(10))),
            renders: AtomicUsize::new(0),
            removed: Mutex::new(Vec::new()),
            rendered: Mutex::new(Vec::new()),
            decorate: AtomicBool::new(false),
        });

        // The real script flips its readiness flag once it has loaded
        let flag = Arc::downgrade(&provider);
        document.on_script_load(move |_| {
            if let Some(provider) = flag.upgrade() {
                provider.set_ready(true);
            }
        });
        provider
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Queues behaviors for the next renders, in order.
    pub fn script(&self, behaviors: impl IntoIterator<Item = Behavior>) {
        self.script.lock().unwrap().extend(behaviors);
    }

    /// Behavior once the script is exhausted.
    pub fn fallback(&self, behavior: Behavior) {
        *self.fallback.lock().unwrap() = behavior;
    }

    /// Inserts an iframe and two buttons into every container rendered into.
    pub fn decorate(&self) {
        self.decorate.store(true, Ordering::SeqCst);
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> Vec<WidgetHandle> {
        self.removed.lock().unwrap().clone()
    }

    pub fn rendered(&self) -> Vec<(ElementId, RenderOptions)> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn last_options(&self) -> Option<RenderOptions> {
        self.rendered
            .lock()
            .unwrap()
            .last()
            .map(|(_, options)| options.clone())
    }

    pub fn last_callbacks(&self) -> Option<ChallengeCallbacks> {
        self.last_options().map(|options| options.callbacks)
    }

    fn next_behavior(&self) -> Behavior {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

impl ChallengeProvider for MockProvider {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn render(
        &self,
        container: ElementId,
        options: RenderOptions,
    ) -> Result<WidgetHandle, BrokerError> {
        let behavior = self.next_behavior();
        if behavior == Behavior::RenderError {
            return Err(BrokerError::Render("widget crashed".to_string()));
        }

        let n = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
        self.rendered
            .lock()
            .unwrap()
            .push((container, options.clone()));

        if self.decorate.load(Ordering::SeqCst) {
            let document = &self.document;
            let iframe = document.create_element("iframe");
            let verify = document.create_element("button");
            let help = document.create_element("button");
            for element in [iframe, verify, help] {
                document.append_child(container, element);
            }
        }

        let callbacks = options.callbacks;
        match behavior {
            Behavior::Succeed(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callbacks.success(format!("token-{n}"));
                });
            }
            Behavior::Fail(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callbacks.error();
                });
            }
            Behavior::Timeout(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callbacks.timeout();
                });
            }
            Behavior::Hang | Behavior::RenderError => {}
        }

        Ok(WidgetHandle::new(format!("widget-{n}")))
    }

    fn remove(&self, handle: &WidgetHandle) {
        self.removed.lock().unwrap().push(handle.clone());
    }
}

/// A settable millisecond clock.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(AtomicU64::new(1_700_000_000_000)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn provider(&self) -> TimeProviderFn {
        let now = Arc::clone(&self.now);
        Arc::new(move || now.load(Ordering::SeqCst))
    }
}

pub struct Fixture {
    pub broker: TokenBroker,
    pub provider: Arc<MockProvider>,
    pub document: Arc<MemoryDocument>,
    pub clock: ManualClock,
}

/// A test configuration with short retry delays.
pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        retry_delay_ms: 100,
        ..BrokerConfig::default()
    }
    .with_site_key(SITE_KEY)
}

/// Routes broker logs through the test harness's captured output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Builds a broker over a mock provider without initializing it.
pub fn build(config: BrokerConfig) -> Fixture {
    init_tracing();
    let document = Arc::new(MemoryDocument::new());
    let provider = MockProvider::new(Arc::clone(&document));
    let clock = ManualClock::new();

    let broker = TokenBroker::builder(provider.clone(), document.clone())
        .with_config(config)
        .with_time_provider(clock.provider())
        .build()
        .expect("test config is valid");

    Fixture {
        broker,
        provider,
        document,
        clock,
    }
}

/// Builds and initializes a broker over a mock provider.
pub async fn setup(config: BrokerConfig) -> Fixture {
    let fixture = build(config);
    fixture.broker.init().await.expect("init succeeds");
    fixture
}

/// Number of elements currently attached to the document body.
pub fn body_len(document: &MemoryDocument) -> usize {
    document.body_children().len()
}

/// Focuses a fresh button on the page, as a form's submit button would be.
pub fn focused_trigger(document: &MemoryDocument) -> ElementId {
    let trigger = document.create_element("button");
    document.append_to_body(trigger);
    document.focus(trigger);
    trigger
}
