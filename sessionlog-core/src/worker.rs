//! Delivery queue shared by producer threads, and the single consumer thread
//! that drains it into the sinks.

use std::{
    io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, after, select, tick, unbounded};

use crate::{
    event::{EventId, LogEvent},
    format::write_trace,
    router::SinkRouter,
};

/// Wake-up reasons of the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Flush,
    Stop,
}

struct QueueState {
    sender: Option<Sender<LogEvent>>,
    next_id: i64,
}

/// FIFO of accepted events. Ids are assigned under the same lock as the
/// append, so id order is queue order.
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                sender: None,
                next_id: 0,
            }),
        }
    }
}

impl DeliveryQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepts events again, with ids restarting at zero.
    pub fn open(&self, sender: Sender<LogEvent>) {
        let mut state = self.lock();
        state.sender = Some(sender);
        state.next_id = 0;
    }

    /// Rejects every later push. Events already pushed stay in the channel.
    pub fn close(&self) {
        self.lock().sender = None;
    }

    /// Events pushed but not yet taken by the worker.
    pub fn pending(&self) -> usize {
        self.lock().sender.as_ref().map_or(0, Sender::len)
    }

    /// Assigns the next id, builds the event with it and appends it.
    /// Returns [`EventId::INVALID`] when the queue is closed.
    pub fn push(&self, build: impl FnOnce(EventId) -> LogEvent) -> EventId {
        let mut state = self.lock();
        let id = EventId::new(state.next_id);
        let Some(sender) = state.sender.as_ref() else {
            return EventId::INVALID;
        };
        if sender.send(build(id)).is_err() {
            return EventId::INVALID;
        }
        state.next_id += 1;
        id
    }
}

struct AutoFlush {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Handle on the consumer thread of one session.
pub struct Worker {
    signals: Sender<Signal>,
    handle: Option<JoinHandle<bool>>,
    auto_flush: Option<AutoFlush>,
    draining: Arc<AtomicUsize>,
}

impl Worker {
    /// Starts the consumer thread and, when both delays are non-zero, the
    /// auto-flush timer. Returns the sender the queue must be opened with.
    pub fn spawn(router: SinkRouter) -> io::Result<(Self, Sender<LogEvent>)> {
        let (sender, events) = unbounded::<LogEvent>();
        let (signals, wakeups) = unbounded::<Signal>();
        let draining = Arc::new(AtomicUsize::new(0));
        let config = Arc::clone(router.config());

        let handle = {
            let events = events.clone();
            let draining = Arc::clone(&draining);
            thread::Builder::new()
                .name("sessionlog-worker".into())
                .spawn(move || run(router, events, wakeups, draining))?
        };

        let mut worker = Self {
            signals,
            handle: Some(handle),
            auto_flush: None,
            draining,
        };
        if config.auto_flush_enabled() {
            worker.auto_flush = Some(spawn_auto_flush(
                config.auto_flush_startup,
                config.auto_flush_period,
                worker.signals.clone(),
                events,
                Arc::clone(&worker.draining),
            )?);
        }
        Ok((worker, sender))
    }

    /// Wakes the worker to drain the pending batch.
    pub fn flush(&self) {
        let _ = self.signals.send(Signal::Flush);
    }

    /// Drains every queued event, closes all sinks and joins the thread.
    /// The queue must be closed first so that nothing arrives afterwards.
    pub fn stop(&mut self) -> bool {
        if let Some(auto_flush) = self.auto_flush.take() {
            drop(auto_flush.stop);
            let _ = auto_flush.handle.join();
        }
        match self.handle.take() {
            Some(handle) => {
                let _ = self.signals.send(Signal::Stop);
                handle.join().unwrap_or(false)
            }
            None => true,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut router: SinkRouter,
    events: Receiver<LogEvent>,
    wakeups: Receiver<Signal>,
    draining: Arc<AtomicUsize>,
) -> bool {
    loop {
        match wakeups.recv() {
            Ok(Signal::Flush) => {
                draining.fetch_add(1, Ordering::SeqCst);
                // only what is queued now; later events wait for the next wake-up
                let pending = events.len();
                deliver(&mut router, events.try_iter().take(pending));
                draining.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(Signal::Stop) | Err(_) => break,
        }
    }
    draining.fetch_add(1, Ordering::SeqCst);
    deliver(&mut router, events.try_iter());
    router.close_all();
    draining.fetch_sub(1, Ordering::SeqCst);
    true
}

fn deliver(router: &mut SinkRouter, batch: impl Iterator<Item = LogEvent>) {
    for event in batch {
        for binding in router.bindings(&event) {
            binding.write(&event);
        }
        if event.trace {
            write_trace(&event);
        }
    }
    router.flush_touched();
}

fn spawn_auto_flush(
    startup: Duration,
    period: Duration,
    signals: Sender<Signal>,
    events: Receiver<LogEvent>,
    draining: Arc<AtomicUsize>,
) -> io::Result<AutoFlush> {
    let (stop, stopped) = unbounded::<()>();
    let handle = thread::Builder::new()
        .name("sessionlog-autoflush".into())
        .spawn(move || {
            select! {
                recv(stopped) -> _ => return,
                recv(after(startup)) -> _ => {}
            }
            let ticker = tick(period);
            loop {
                // a tick is skipped while a drain is in progress
                if draining.load(Ordering::SeqCst) == 0 && !events.is_empty() {
                    let _ = signals.send(Signal::Flush);
                }
                select! {
                    recv(stopped) -> _ => return,
                    recv(ticker) -> _ => {}
                }
            }
        })?;
    Ok(AutoFlush { stop, handle })
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::atomic::AtomicBool, time::Instant};

    use chrono::Local;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::{LogConfig, PluginSpec, RouteEntry},
        event::Payload,
        level::LogLevel,
        plugins::Plugins,
        router::SessionInfo,
        sink::{Sink, SinkInit},
    };

    #[derive(Default, Clone)]
    struct Captured {
        ids: Arc<Mutex<Vec<i64>>>,
        flushes: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        broken_flush: Arc<AtomicBool>,
    }

    struct CaptureSink(Captured);

    impl Sink for CaptureSink {
        fn init(&mut self, _: SinkInit) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, event: &LogEvent) -> io::Result<()> {
            if event.text == "boom" {
                panic!("sink exploded");
            }
            self.0.ids.lock().unwrap().push(event.id.get());
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.0.broken_flush.load(Ordering::SeqCst) {
                panic!("flush exploded");
            }
            self.0.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            if self.0.broken_flush.load(Ordering::SeqCst) {
                panic!("close exploded");
            }
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn start(config: LogConfig) -> (DeliveryQueue, Worker, Captured) {
        let captured = Captured::default();
        let mut plugins = Plugins::empty();
        let shared = captured.clone();
        plugins
            .register_sink("capture", move || Box::new(CaptureSink(shared.clone())))
            .unwrap();
        let mut config = config;
        config.default_entry = RouteEntry::new("*").with_sink(PluginSpec::new("capture"));
        let session = SessionInfo {
            guid: Uuid::new_v4(),
            context: "ctx".into(),
            session_folder: PathBuf::from("/tmp/unused"),
            resource_folder: PathBuf::from("/tmp/unused/Resources"),
        };
        let router = SinkRouter::new(session, Arc::new(config), plugins);
        let (worker, sender) = Worker::spawn(router).unwrap();
        let queue = DeliveryQueue::default();
        queue.open(sender);
        (queue, worker, captured)
    }

    fn no_auto_flush() -> LogConfig {
        let mut config = LogConfig::in_folder("/tmp/unused");
        config.auto_flush_startup = Duration::ZERO;
        config
    }

    fn push(queue: &DeliveryQueue, text: &str) -> EventId {
        queue.push(|id| LogEvent {
            id,
            parent_id: EventId::INVALID,
            start_id: EventId::INVALID,
            thread: "1".into(),
            timestamp: Local::now(),
            trace: false,
            logger: Arc::from("app"),
            entry_id: None,
            level: LogLevel::Info,
            text: text.into(),
            payload: Payload::Text,
            rendered: None,
        })
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_closed_queue_rejects_without_consuming_ids() {
        let (queue, mut worker, captured) = start(no_auto_flush());
        assert_eq!(push(&queue, "a"), EventId::new(0));
        queue.close();
        assert_eq!(push(&queue, "b"), EventId::INVALID);
        assert!(worker.stop());
        assert_eq!(*captured.ids.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_events_wait_for_a_wakeup() {
        let (queue, mut worker, captured) = start(no_auto_flush());
        for text in ["a", "b", "c"] {
            push(&queue, text);
        }
        thread::sleep(Duration::from_millis(50));
        assert!(captured.ids.lock().unwrap().is_empty());
        assert_eq!(queue.pending(), 3);

        worker.flush();
        assert!(wait_for(|| captured.ids.lock().unwrap().len() == 3));
        // one flush per touched sink per batch
        assert!(wait_for(|| captured.flushes.load(Ordering::SeqCst) == 1));

        queue.close();
        worker.stop();
        assert_eq!(captured.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_drains_everything() {
        let (queue, mut worker, captured) = start(no_auto_flush());
        for i in 0..500 {
            assert_eq!(push(&queue, "x"), EventId::new(i));
        }
        queue.close();
        assert!(worker.stop());
        let ids = captured.ids.lock().unwrap();
        assert_eq!(*ids, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_sink_does_not_stop_delivery() {
        let (queue, mut worker, captured) = start(no_auto_flush());
        push(&queue, "boom");
        push(&queue, "fine");
        queue.close();
        assert!(worker.stop());
        assert_eq!(*captured.ids.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_panicking_flush_does_not_stop_the_worker() {
        let (queue, mut worker, captured) = start(no_auto_flush());
        captured.broken_flush.store(true, Ordering::SeqCst);
        push(&queue, "first");
        worker.flush();
        assert!(wait_for(|| captured.ids.lock().unwrap().len() == 1));

        push(&queue, "second");
        worker.flush();
        assert!(wait_for(|| captured.ids.lock().unwrap().len() == 2));

        queue.close();
        assert!(worker.stop());
        assert_eq!(*captured.ids.lock().unwrap(), vec![0, 1]);
        assert_eq!(captured.flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_auto_flush_delivers_without_explicit_flush() {
        let mut config = LogConfig::in_folder("/tmp/unused");
        config.auto_flush_startup = Duration::from_millis(10);
        config.auto_flush_period = Duration::from_millis(10);
        let (queue, mut worker, captured) = start(config);
        push(&queue, "tick");
        assert!(wait_for(|| captured.ids.lock().unwrap().len() == 1));
        queue.close();
        worker.stop();
    }
}
