// SPDX-License-Identifier: GPL-3.0-only
//! Sensor reader task
//!
//! Owns the connection to the sensor, turns lines into samples and keeps
//! the connection alive. The sample sequence never ends on its own: a lost
//! link is reopened with exponential backoff, and only an explicit stop or
//! an exhausted reconnect window ends the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::config::SensorConfig;

use super::backoff::Backoff;
use super::frame::decode_frame;
use super::link::{SensorLink, SensorStream};

/// One calibrated ambient reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessSample {
    pub timestamp: Instant,
    /// Reading as sent by the sensor
    pub raw: u32,
    /// Brightness percent after calibration (0-100)
    pub target: u16,
}

/// Link transitions reported to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    Connected,
    /// An established link broke; sent once per break
    Lost,
    Reconnecting { attempt: u32, delay: Duration },
    /// The link stayed down for the whole reconnect window
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Exhausted,
}

/// Longest line kept while waiting for a newline
const MAX_FRAME_LEN: usize = 64;

/// Why a connected stream stopped producing lines
enum ReadEnd {
    Stopped,
    /// `delivered` is set when the stream produced at least one sample
    Lost { reason: String, delivered: bool },
}

pub struct SensorReader {
    config: SensorConfig,
    link: Arc<dyn SensorLink>,
    samples: broadcast::Sender<BrightnessSample>,
    events: mpsc::UnboundedSender<SensorEvent>,
    state: watch::Sender<LinkState>,
}

impl SensorReader {
    pub fn new(
        config: SensorConfig,
        link: Arc<dyn SensorLink>,
        samples: broadcast::Sender<BrightnessSample>,
        events: mpsc::UnboundedSender<SensorEvent>,
        state: watch::Sender<LinkState>,
    ) -> Self {
        Self {
            config,
            link,
            samples,
            events,
            state,
        }
    }

    pub fn spawn(self, stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    fn emit(&self, event: SensorEvent) {
        // The controller may already be gone during shutdown
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let endpoint = self.link.describe();
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        let mut down_since: Option<Instant> = None;

        info!("Sensor reader started on {}", endpoint);
        self.set_state(LinkState::Connecting);

        loop {
            if *stop.borrow() {
                break;
            }

            match self.link.open() {
                Ok(stream) => {
                    info!("Sensor connected on {}", endpoint);
                    self.set_state(LinkState::Connected);
                    self.emit(SensorEvent::Connected);

                    match self.read_frames(stream, &mut stop).await {
                        ReadEnd::Stopped => break,
                        ReadEnd::Lost { reason, delivered } => {
                            warn!("Sensor link on {} lost: {}", endpoint, reason);
                            self.emit(SensorEvent::Lost);
                            // An open port that never produced a sample is
                            // still down: keep the window and the backoff
                            if delivered {
                                backoff.reset();
                                down_since = Some(Instant::now());
                            } else {
                                down_since.get_or_insert_with(Instant::now);
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("can't open sensor {}: {}", endpoint, e);
                    down_since.get_or_insert_with(Instant::now);
                }
            }

            if down_since.is_some_and(|since| since.elapsed() >= self.config.reconnect_window) {
                error!(
                    "Sensor on {} unreachable for {:?}, giving up",
                    endpoint, self.config.reconnect_window
                );
                self.set_state(LinkState::Exhausted);
                self.emit(SensorEvent::Exhausted);
                return;
            }

            let delay = backoff.next_delay();
            let attempt = backoff.attempts();
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to sensor on {}", endpoint
            );
            self.set_state(LinkState::Reconnecting);
            self.emit(SensorEvent::Reconnecting { attempt, delay });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                res = stop.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Sensor reader on {} stopped", endpoint);
        self.set_state(LinkState::Idle);
    }

    /// Read lines until the link breaks or a stop is requested
    ///
    /// Partial lines survive a timeout: `read_until` appends what it got to
    /// `line`, and the next call continues from there. A line longer than
    /// `MAX_FRAME_LEN` is dropped and reading resyncs on the next newline.
    async fn read_frames(&self, stream: SensorStream, stop: &mut watch::Receiver<bool>) -> ReadEnd {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        let mut timeouts = 0u32;
        let mut delivered = false;
        let mut discarding = false;

        let lost = |reason: String, delivered: bool| ReadEnd::Lost { reason, delivered };

        loop {
            if *stop.borrow() {
                return ReadEnd::Stopped;
            }

            let room = (MAX_FRAME_LEN + 1).saturating_sub(line.len()).max(1);
            let mut bounded = (&mut reader).take(room as u64);

            tokio::select! {
                res = stop.changed() => {
                    if res.is_err() {
                        return ReadEnd::Stopped;
                    }
                }
                res = tokio::time::timeout(
                    self.config.read_timeout,
                    bounded.read_until(b'\n', &mut line),
                ) => match res {
                    Err(_) => {
                        timeouts += 1;
                        debug!("Sensor read timeout ({}/{})", timeouts, self.config.disconnect_threshold);
                        if timeouts >= self.config.disconnect_threshold {
                            return lost(format!("{} consecutive read timeouts", timeouts), delivered);
                        }
                    }
                    Ok(Ok(0)) => return lost("end of stream".to_string(), delivered),
                    Ok(Ok(_)) if line.ends_with(b"\n") => {
                        timeouts = 0;
                        if discarding {
                            discarding = false;
                        } else if self.handle_frame(&line) {
                            delivered = true;
                        }
                        line.clear();
                    }
                    Ok(Ok(_)) if line.len() > MAX_FRAME_LEN => {
                        if !discarding {
                            debug!("Dropping sensor line over {} bytes", MAX_FRAME_LEN);
                            discarding = true;
                        }
                        line.clear();
                    }
                    // Data without newline otherwise only happens right before EOF
                    Ok(Ok(_)) => return lost("end of stream".to_string(), delivered),
                    Ok(Err(e)) => return lost(e.to_string(), delivered),
                },
            }
        }
    }

    /// Publish the sample carried by `line`; false when it doesn't decode
    fn handle_frame(&self, line: &[u8]) -> bool {
        let raw = match decode_frame(line) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Dropping sensor frame: {}", e);
                return false;
            }
        };

        let sample = BrightnessSample {
            timestamp: Instant::now(),
            raw,
            target: self.config.calibration.to_percent(raw),
        };
        trace!("Sensor sample: {:?}", sample);

        if self.samples.send(sample).is_err() {
            trace!("No sample subscribers");
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;

    /// Link handing out queued streams, failing once the queue is empty
    #[derive(Default)]
    pub struct FakeLink {
        pub streams: Mutex<VecDeque<DuplexStream>>,
        pub opens: Mutex<u32>,
    }

    impl FakeLink {
        /// Queue a connection and return the sensor's end of it
        pub fn connect(&self) -> DuplexStream {
            let (client, server) = tokio::io::duplex(256);
            self.streams.lock().unwrap().push_back(client);
            server
        }
    }

    impl SensorLink for FakeLink {
        fn open(&self) -> std::io::Result<SensorStream> {
            *self.opens.lock().unwrap() += 1;
            match self.streams.lock().unwrap().pop_front() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
            }
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    struct Harness {
        samples: broadcast::Receiver<BrightnessSample>,
        events: mpsc::UnboundedReceiver<SensorEvent>,
        state: watch::Receiver<LinkState>,
        stop: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn config() -> SensorConfig {
        SensorConfig {
            read_timeout: Duration::from_millis(1000),
            disconnect_threshold: 3,
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_millis(800),
            reconnect_window: Duration::from_secs(3600),
            ..SensorConfig::default()
        }
    }

    fn start(config: SensorConfig, link: Arc<FakeLink>) -> Harness {
        let (samples_tx, samples) = broadcast::channel(8);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(LinkState::Idle);
        let (stop, stop_rx) = watch::channel(false);
        let reader = SensorReader::new(config, link, samples_tx, events_tx, state_tx);
        Harness {
            samples,
            events,
            state,
            stop,
            task: reader.spawn(stop_rx),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_become_calibrated_samples() {
        let link = Arc::new(FakeLink::default());
        let mut sensor = link.connect();
        let mut h = start(config(), link);

        sensor.write_all(b"20\nnoise\n21*03\n33*01\n").await.unwrap();

        let first = h.samples.recv().await.unwrap();
        assert_eq!((first.raw, first.target), (20, 40));
        let second = h.samples.recv().await.unwrap();
        assert_eq!((second.raw, second.target), (21, 42));

        assert_eq!(h.events.recv().await, Some(SensorEvent::Connected));
        assert_eq!(*h.state.borrow(), LinkState::Connected);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
        assert_eq!(*h.state.borrow(), LinkState::Idle);
        // Malformed and bad-checksum lines never became samples
        assert!(h.samples.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_link_is_lost_once_then_backs_off() {
        let link = Arc::new(FakeLink::default());
        let _sensor = link.connect();
        let mut h = start(config(), link.clone());

        assert_eq!(h.events.recv().await, Some(SensorEvent::Connected));
        assert_eq!(h.events.recv().await, Some(SensorEvent::Lost));

        let mut delays = Vec::new();
        for expected_attempt in 1..=5 {
            match h.events.recv().await {
                Some(SensorEvent::Reconnecting { attempt, delay }) => {
                    assert_eq!(attempt, expected_attempt);
                    delays.push(delay.as_millis() as u64);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(delays, vec![100, 200, 400, 800, 800]);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
        while let Ok(event) = h.events.try_recv() {
            assert_ne!(event, SensorEvent::Lost);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_eof() {
        let link = Arc::new(FakeLink::default());
        let sensor = link.connect();
        let mut second = link.connect();
        let mut h = start(config(), link);

        assert_eq!(h.events.recv().await, Some(SensorEvent::Connected));
        drop(sensor);
        assert_eq!(h.events.recv().await, Some(SensorEvent::Lost));
        assert!(matches!(
            h.events.recv().await,
            Some(SensorEvent::Reconnecting { attempt: 1, .. })
        ));
        assert_eq!(h.events.recv().await, Some(SensorEvent::Connected));

        second.write_all(b"10\n").await.unwrap();
        assert_eq!(h.samples.recv().await.unwrap().target, 20);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_reconnect_window() {
        let link = Arc::new(FakeLink::default());
        let config = SensorConfig {
            backoff_initial: Duration::from_millis(500),
            reconnect_window: Duration::from_secs(1),
            ..config()
        };
        let mut h = start(config, link.clone());

        h.task.await.unwrap();
        assert_eq!(*h.state.borrow(), LinkState::Exhausted);

        let mut last = None;
        while let Ok(event) = h.events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(SensorEvent::Exhausted));
        assert_eq!(*link.opens.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlong_line_is_dropped_and_reading_resyncs() {
        let link = Arc::new(FakeLink::default());
        let mut sensor = link.connect();
        let mut h = start(config(), link);

        sensor.write_all(&[b'7'; 200]).await.unwrap();
        sensor.write_all(b"\n12\n").await.unwrap();

        let sample = h.samples.recv().await.unwrap();
        assert_eq!(sample.raw, 12);
        assert_eq!(*h.state.borrow(), LinkState::Connected);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
        assert!(h.samples.try_recv().is_err());
        assert_eq!(h.events.recv().await, Some(SensorEvent::Connected));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_ports_keep_backing_off_until_exhausted() {
        let link = Arc::new(FakeLink::default());
        // Ports that open fine but never say anything
        let _sensors: Vec<_> = (0..6).map(|_| link.connect()).collect();
        let config = SensorConfig {
            reconnect_window: Duration::from_secs(15),
            ..config()
        };
        let mut h = start(config, link.clone());

        h.task.await.unwrap();
        assert_eq!(*h.state.borrow(), LinkState::Exhausted);

        let mut delays = Vec::new();
        let mut last = None;
        while let Ok(event) = h.events.try_recv() {
            if let SensorEvent::Reconnecting { delay, .. } = event {
                delays.push(delay.as_millis() as u64);
            }
            last = Some(event);
        }
        assert_eq!(delays, vec![100, 200, 400, 800, 800]);
        assert_eq!(last, Some(SensorEvent::Exhausted));
        assert_eq!(*link.opens.lock().unwrap(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_once_a_sample_arrives() {
        let link = Arc::new(FakeLink::default());
        drop(link.connect());
        drop(link.connect());
        let mut talking = link.connect();
        talking.write_all(b"10\n").await.unwrap();
        drop(talking);
        let _last = link.connect();
        let mut h = start(config(), link);

        let mut attempts = Vec::new();
        while attempts.len() < 3 {
            if let Some(SensorEvent::Reconnecting { attempt, delay }) = h.events.recv().await {
                attempts.push((attempt, delay.as_millis() as u64));
            }
        }
        assert_eq!(attempts, vec![(1, 100), (2, 200), (1, 100)]);
        assert_eq!(h.samples.recv().await.unwrap().raw, 10);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
    }
}
