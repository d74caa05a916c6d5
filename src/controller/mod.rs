// SPDX-License-Identifier: GPL-3.0-only
//! Auto-brightness controller
//!
//! One control task consumes sensor samples and decides which monitors to
//! write (see [`state`]). Each decided write runs as its own job so a
//! transition on one monitor never holds up the loop or other monitors.
//! Jobs on the same transport family take turns through a bus gate; the
//! DDC/CI and USB families run side by side.
//!
//! # Stopping
//!
//! A stop is checked between iterations and between transition steps,
//! never inside a write. `stop()` waits for in-flight writes, then for the
//! sensor reader to drop its connection, so a stopped engine holds no
//! handles and can be started again.

pub mod animation;
pub mod state;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{BrightnessError, Result};
use crate::monitor::{DisplayId, DisplayManager, Monitor, TransportKind};
use crate::sensor::{BrightnessSample, LinkState, SensorEvent, SensorLink, SensorReader};

use animation::{Transition, plan_transition};
pub use state::AutoMode;
use state::{ControlState, WritePlan};

/// A running write or transition for one monitor
struct Job {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    state: Mutex<ControlState>,
    jobs: Mutex<HashMap<DisplayId, Job>>,
    /// Wakes the loop when a job ends or the enabled set changes
    notify: Notify,
    gates: HashMap<TransportKind, Arc<tokio::sync::Mutex<()>>>,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<DisplayId, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn gate(&self, transport: TransportKind) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .get(&transport)
            .cloned()
            .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(())))
    }

    /// Cancel and await the job of one monitor
    async fn cancel_job(&self, key: &str) {
        let job = self.jobs().remove(key);
        if let Some(job) = job {
            job.cancel.send_replace(true);
            if let Err(e) = job.handle.await {
                error!("Auto brightness job for {} failed: {}", key, e);
            }
        }
    }

    async fn cancel_all(&self) {
        let jobs: Vec<_> = self.jobs().drain().collect();
        for (_, job) in &jobs {
            job.cancel.send_replace(true);
        }
        for (key, job) in jobs {
            if let Err(e) = job.handle.await {
                error!("Auto brightness job for {} failed: {}", key, e);
            }
        }
    }
}

struct Running {
    stop: watch::Sender<bool>,
    control: JoinHandle<()>,
    reader: JoinHandle<()>,
    link_state: watch::Receiver<LinkState>,
}

pub struct AutoBrightnessController {
    config: Arc<Config>,
    manager: DisplayManager,
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl AutoBrightnessController {
    pub fn new(config: Arc<Config>, manager: DisplayManager) -> Self {
        let gates = [TransportKind::DdcCi, TransportKind::Usb]
            .into_iter()
            .map(|kind| (kind, Arc::new(tokio::sync::Mutex::new(()))))
            .collect();

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControlState::new(config.clone())),
                jobs: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                gates,
            }),
            config,
            manager,
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn mode(&self, key: &str) -> AutoMode {
        self.shared.state().mode(key)
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.shared.state().is_active(key)
    }

    pub fn enabled_count(&self) -> usize {
        self.shared.state().active_count()
    }

    /// Put a monitor under automatic control
    pub fn enable(&self, key: &str, current: Option<u16>) {
        self.shared.state().enable(key, current);
        info!("Auto brightness enabled for {}", key);
        self.shared.notify.notify_one();
    }

    /// Release a monitor; returns once no automatic write can reach it
    pub async fn disable(&self, key: &str) {
        if self.shared.state().disable(key) {
            info!("Auto brightness disabled for {}", key);
        }
        self.shared.cancel_job(key).await;
        self.shared.state().finish(key);
    }

    /// Record a manual write so the deadband compares against it
    pub fn note_manual(&self, key: &str, value: u16) {
        self.shared.state().note_manual(key, value);
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn link_state(&self) -> LinkState {
        match self.running.lock().await.as_ref() {
            Some(running) => *running.link_state.borrow(),
            None => LinkState::Idle,
        }
    }

    /// Open the sensor and start the control loop
    pub async fn start(&self, link: Arc<dyn SensorLink>) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(BrightnessError::Engine("already running".to_string()));
        }

        self.shared.state().reset_session();

        let (samples_tx, samples) = broadcast::channel(self.config.sensor.sample_buffer.max(1));
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, link_state) = watch::channel(LinkState::Idle);
        let (stop, stop_rx) = watch::channel(false);

        let reader = SensorReader::new(
            self.config.sensor.clone(),
            link,
            samples_tx,
            events_tx,
            state_tx,
        )
        .spawn(stop_rx.clone());

        let control = tokio::spawn(control_loop(
            self.shared.clone(),
            self.manager.clone(),
            self.config.clone(),
            samples,
            events,
            stop_rx,
        ));

        info!("Auto brightness engine started");
        *running = Some(Running {
            stop,
            control,
            reader,
            link_state,
        });
        Ok(())
    }

    /// Stop the loop, finish in-flight writes and close the sensor
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(BrightnessError::Engine("not running".to_string()));
        };

        running.stop.send_replace(true);
        if let Err(e) = running.control.await {
            error!("Control loop failed: {}", e);
        }
        if let Err(e) = running.reader.await {
            error!("Sensor reader failed: {}", e);
        }

        info!("Auto brightness engine stopped");
        Ok(())
    }
}

async fn control_loop(
    shared: Arc<Shared>,
    manager: DisplayManager,
    config: Arc<Config>,
    mut samples: broadcast::Receiver<BrightnessSample>,
    mut events: mpsc::UnboundedReceiver<SensorEvent>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("Control loop running");
    let mut sensor_open = true;

    loop {
        if *stop.borrow() {
            break;
        }

        let deadline = shared.state().next_deadline();

        tokio::select! {
            biased;

            res = stop.changed() => {
                if res.is_err() {
                    break;
                }
                continue;
            }
            res = samples.recv(), if sensor_open => match res {
                Ok(sample) => {
                    let smoothed = shared.state().on_sample(sample.target);
                    trace!(raw = sample.raw, target = sample.target, smoothed, "Sample");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Controller behind, skipped {} stale samples", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Sample stream closed");
                    sensor_open = false;
                }
            },
            Some(event) = events.recv() => handle_event(&shared, event),
            _ = shared.notify.notified() => {}
            _ = sleep_until(deadline), if deadline.is_some() => {}
        }

        dispatch(&shared, &manager, &config).await;
    }

    shared.cancel_all().await;
    debug!("Control loop exited");
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

fn handle_event(shared: &Shared, event: SensorEvent) {
    match event {
        SensorEvent::Connected => {
            shared.state().set_paused(false);
            info!("Sensor online, auto brightness active");
        }
        SensorEvent::Lost => {
            shared.state().set_paused(true);
            warn!("Sensor lost, holding current brightness");
        }
        SensorEvent::Reconnecting { attempt, delay } => {
            debug!("Sensor reconnect attempt {} in {:?}", attempt, delay);
        }
        SensorEvent::Exhausted => {
            shared.state().set_paused(true);
            error!("Sensor unavailable, auto brightness suspended until restart");
        }
    }
}

/// Start a job for every write that is due now
async fn dispatch(shared: &Arc<Shared>, manager: &DisplayManager, config: &Config) {
    let plans = shared.state().due_writes(Instant::now());

    for plan in plans {
        let Some(monitor) = manager.get(&plan.key).await else {
            debug!("{} is gone from the registry", plan.key);
            shared.state().finish(&plan.key);
            continue;
        };

        let key = plan.key.clone();
        let transition = plan_transition(plan.from, plan.to, &config.controller);
        let (cancel, cancel_rx) = watch::channel(false);

        // The job is registered before it can take its first step, so a
        // concurrent disable() always finds and awaits it. A previous job
        // for this key has already marked itself finished.
        let mut jobs = shared.jobs();
        let handle = tokio::spawn(run_job(
            shared.clone(),
            monitor,
            plan,
            transition,
            cancel_rx,
        ));
        jobs.insert(key, Job { cancel, handle });
    }
}

/// Write one transition to one monitor
async fn run_job(
    shared: Arc<Shared>,
    monitor: Monitor,
    plan: WritePlan,
    transition: Transition,
    mut cancel: watch::Receiver<bool>,
) {
    let key = plan.key;
    let gate = shared.gate(monitor.transport());

    for (i, value) in transition.steps.iter().copied().enumerate() {
        if i > 0 {
            tokio::select! {
                _ = tokio::time::sleep(transition.interval) => {}
                _ = cancel.changed() => {}
            }
        }
        if *cancel.borrow() || !shared.state().is_active(&key) {
            debug!("Transition on {} cancelled", key);
            break;
        }

        let res = {
            let _bus = gate.lock().await;
            monitor.set_brightness(value).await
        };

        match res {
            Ok(()) => {
                trace!("Auto {} -> {}%", key, value);
                shared.state().record_applied(&key, value, Instant::now());
            }
            Err(e) => {
                shared.state().record_failure(&key, &e);
                break;
            }
        }
    }

    shared.state().finish(&key);
    shared.notify.notify_one();
}
