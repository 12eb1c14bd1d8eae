// src/driver/mod.rs - Step-based command translator for GRBL
mod error;

pub use error::DriverError;

use crate::communication::{SerialChannel, SerialPortChannel};
use crate::config::{AxisConfig, Config};
use crate::grbl::command::{self, MotionCommand, MoveMode, Realtime};
use crate::grbl::settings::{self as grbl_settings, GrblSettings};
use crate::grbl::{error_description, Axis, GrblResponse, MachineState, StatusReport};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, timeout_at, Instant};

/// Upper bound on lines discarded by a single drain.
const MAX_DRAIN_LINES: usize = 100;

/// The channel plus what the driver knows about unread input on it.
struct Link<C> {
    channel: C,
    /// Set while an exchange waits for its answer, and left set when it ends
    /// without one (timeout, alarm, reset, dropped future). Late lines must
    /// be drained before the next command so that they are not mistaken for
    /// its acknowledgement.
    stale: bool,
}

impl<C: SerialChannel> Link<C> {
    async fn send_line(&mut self, line: &str) -> Result<(), DriverError> {
        tracing::debug!("GRBL <- {}", line);
        self.channel.write(format!("{}\n", line).as_bytes()).await?;
        Ok(())
    }

    async fn send_realtime(&mut self, cmd: Realtime) -> Result<(), DriverError> {
        tracing::debug!("GRBL <- {:?} (0x{:02x})", cmd, cmd.byte());
        self.channel.write(&[cmd.byte()]).await?;
        Ok(())
    }

    async fn read_before(&mut self, deadline: Instant, waited: Duration) -> Result<String, DriverError> {
        match timeout_at(deadline, self.channel.read_line()).await {
            Ok(Ok(line)) => {
                tracing::debug!("GRBL -> {}", line);
                Ok(line)
            }
            Ok(Err(e)) => {
                tracing::error!("Serial read error: {}", e);
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!("Timeout after {:?} waiting for GRBL", waited);
                self.stale = true;
                Err(DriverError::Timeout(waited))
            }
        }
    }

    /// Read until the line has been quiet for `window`.
    async fn drain(&mut self, window: Duration) -> Result<Vec<String>, DriverError> {
        let mut drained = Vec::new();
        while drained.len() < MAX_DRAIN_LINES {
            match timeout(window, self.channel.read_line()).await {
                Ok(Ok(line)) => {
                    tracing::debug!("GRBL -> {} (drained)", line);
                    drained.push(line);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
        Ok(drained)
    }

    async fn resync(&mut self, window: Duration) -> Result<(), DriverError> {
        if !self.stale {
            return Ok(());
        }
        let drained = self.drain(window).await?;
        self.stale = false;
        for line in drained {
            match GrblResponse::parse(&line) {
                GrblResponse::Alarm(_) => return Err(DriverError::alarm(line.trim())),
                _ => tracing::debug!("Discarded stale line: {}", line),
            }
        }
        Ok(())
    }
}

/// Host-side driver for a GRBL controller, addressed in motor steps.
///
/// Every operation holds the channel for its whole request/response
/// exchange, so the driver can be shared (e.g. in an `Arc`) and concurrent
/// calls are serialized rather than interleaved. Nothing is retried:
/// errors and timeouts are returned to the caller as they happen.
///
/// Moves only wait for GRBL's `ok`, which means the block was accepted into
/// GRBL's planner. Use [`GrblDriver::move_and_wait`] or
/// [`GrblDriver::wait_until_idle`] to wait for the motion itself.
pub struct GrblDriver<C = SerialPortChannel> {
    link: Mutex<Link<C>>,
    axes: BTreeMap<Axis, AxisConfig>,
    global: BTreeMap<u16, f64>,
    timeout: Duration,
    homing_timeout: Duration,
    startup_delay: Duration,
    drain_window: Duration,
}

impl GrblDriver<SerialPortChannel> {
    /// Open the configured port and wait for GRBL to boot.
    pub async fn connect(config: &Config) -> Result<Self, DriverError> {
        config.validate()?;
        tracing::info!(
            "Connecting to GRBL on {} at {} baud",
            config.serial.port, config.serial.baud
        );
        let channel = SerialPortChannel::open(&config.serial.port, config.serial.baud)?;
        let driver = Self::with_channel(channel, config)?;
        driver.wake().await?;
        Ok(driver)
    }
}

impl<C: SerialChannel> GrblDriver<C> {
    /// Wrap an already open channel. No I/O is performed.
    pub fn with_channel(channel: C, config: &Config) -> Result<Self, DriverError> {
        let axes = config.axis_configs()?;
        let global = config.global_settings()?;
        Ok(Self {
            link: Mutex::new(Link { channel, stale: false }),
            axes,
            global,
            timeout: config.serial.timeout(),
            homing_timeout: config.serial.homing_timeout(),
            startup_delay: config.serial.startup_delay(),
            drain_window: config.serial.drain_window(),
        })
    }

    /// Send the wake-up sequence, give GRBL time to boot and discard
    /// whatever it printed. Returns the firmware version if a greeting
    /// was seen.
    pub async fn wake(&self) -> Result<Option<String>, DriverError> {
        let mut link = self.link.lock().await;
        tracing::info!("Waking up GRBL");
        link.channel.write(command::WAKE_UP.as_bytes()).await?;
        sleep(self.startup_delay).await;
        let drained = link.drain(self.drain_window).await?;
        link.stale = false;

        let version = drained.iter().find_map(|line| match GrblResponse::parse(line) {
            GrblResponse::Greeting(version) => Some(version),
            _ => None,
        });
        match &version {
            Some(version) => tracing::info!("Connected to GRBL {}", version),
            None => tracing::warn!("No GRBL greeting received; continuing"),
        }
        Ok(version)
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.axes.keys().copied()
    }

    pub fn axis_config(&self, axis: Axis) -> Result<&AxisConfig, DriverError> {
        self.axes.get(&axis).ok_or(DriverError::InvalidAxis(axis))
    }

    /// Move `axis` by `steps` (sign gives direction) at `rate` steps/s, or
    /// the axis default rate. Returns once GRBL acknowledges the command.
    pub async fn move_steps(&self, axis: Axis, steps: i64, rate: Option<f64>) -> Result<(), DriverError> {
        self.execute(&MotionCommand::relative(axis, steps, rate)).await
    }

    /// Move `axis` to `target` steps from the machine origin.
    pub async fn move_to(&self, axis: Axis, target: i64, rate: Option<f64>) -> Result<(), DriverError> {
        self.execute(&MotionCommand::absolute(axis, target, rate)).await
    }

    /// Validate a motion command against the axis configuration and send it.
    pub async fn execute(&self, cmd: &MotionCommand) -> Result<(), DriverError> {
        let axis_config = self.axis_config(cmd.axis)?;
        match cmd.mode {
            MoveMode::Relative if cmd.steps == 0 => return Err(DriverError::InvalidSteps),
            MoveMode::Absolute if !axis_config.in_travel(cmd.steps) => {
                return Err(DriverError::OutOfRange { axis: cmd.axis, target: cmd.steps });
            }
            _ => {}
        }
        if let Some(rate) = cmd.rate {
            if !(rate.is_finite() && rate > 0.0 && rate <= axis_config.max_rate) {
                return Err(DriverError::InvalidRate {
                    axis: cmd.axis,
                    rate,
                    max: axis_config.max_rate,
                });
            }
        }

        let line = cmd.to_gcode(axis_config.steps_per_mm, axis_config.default_rate);
        tracing::info!(
            "Moving {} {} {} steps at {} steps/s",
            cmd.axis,
            if cmd.mode == MoveMode::Relative { "by" } else { "to" },
            cmd.steps,
            cmd.rate.unwrap_or(axis_config.default_rate)
        );
        self.exchange(&line, self.timeout).await.map(|_| ())
    }

    /// Relative move that also waits for the motion to finish and checks
    /// that the axis ended on the target, within what GRBL's status report
    /// can resolve. Returns the final position in steps.
    pub async fn move_and_wait(
        &self,
        axis: Axis,
        steps: i64,
        rate: Option<f64>,
        poll_interval: Duration,
    ) -> Result<i64, DriverError> {
        let tolerance = self.axis_config(axis)?.position_tolerance();
        let start = self.position(axis).await?;
        self.move_steps(axis, steps, rate).await?;
        // GRBL may still report Idle right after the ok.
        sleep(poll_interval).await;
        self.wait_until_idle(poll_interval).await?;

        let actual = self.position(axis).await?;
        let expected = start + steps;
        if (actual - expected).abs() > tolerance {
            return Err(DriverError::MissedTarget { axis, expected, actual });
        }
        Ok(actual)
    }

    /// Run the single-axis homing cycle (`$H<axis>`). GRBL acknowledges
    /// only after the cycle completes, so the homing timeout applies.
    pub async fn home(&self, axis: Axis) -> Result<(), DriverError> {
        self.axis_config(axis)?;
        tracing::info!("Homing axis {}", axis);
        self.exchange(&command::home_axis(axis), self.homing_timeout).await?;
        tracing::info!("Axis {} homed", axis);
        Ok(())
    }

    /// Query a real-time status report.
    pub async fn status(&self) -> Result<StatusReport, DriverError> {
        let mut link = self.link.lock().await;
        link.resync(self.drain_window).await?;
        // Stays set if this future is dropped before the report arrives.
        link.stale = true;
        link.send_realtime(Realtime::StatusQuery).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let raw = link.read_before(deadline, self.timeout).await?;
            match GrblResponse::parse(&raw) {
                GrblResponse::Status(report) => {
                    link.stale = false;
                    return Ok(report);
                }
                GrblResponse::Alarm(_) => return Err(DriverError::alarm(raw.trim())),
                other => tracing::debug!("Skipping {:?} while waiting for status", other),
            }
        }
    }

    /// Machine position of every configured axis, in steps.
    pub async fn positions(&self) -> Result<BTreeMap<Axis, i64>, DriverError> {
        let report = self.status().await?;
        let machine = report.machine_position().ok_or_else(|| {
            DriverError::Protocol("work position reported without WCO; set $10=1".to_string())
        })?;
        self.axes
            .iter()
            .map(|(axis, axis_config)| {
                let mm = machine.get(axis.index()).copied().ok_or_else(|| {
                    DriverError::Protocol(format!("no position reported for axis {}", axis))
                })?;
                Ok((*axis, (mm * axis_config.steps_per_mm).round() as i64))
            })
            .collect()
    }

    pub async fn position(&self, axis: Axis) -> Result<i64, DriverError> {
        self.axis_config(axis)?;
        let positions = self.positions().await?;
        positions.get(&axis).copied().ok_or(DriverError::InvalidAxis(axis))
    }

    /// Poll the status until GRBL is no longer executing motion.
    pub async fn wait_until_idle(&self, poll_interval: Duration) -> Result<StatusReport, DriverError> {
        loop {
            let report = self.status().await?;
            match report.state {
                MachineState::Alarm => return Err(DriverError::alarm("Alarm")),
                state if state.is_moving() => sleep(poll_interval).await,
                _ => return Ok(report),
            }
        }
    }

    /// Decelerate to a halt, keeping position (`!`).
    pub async fn feed_hold(&self) -> Result<(), DriverError> {
        self.link.lock().await.send_realtime(Realtime::FeedHold).await
    }

    /// Resume after a feed hold (`~`).
    pub async fn cycle_start(&self) -> Result<(), DriverError> {
        self.link.lock().await.send_realtime(Realtime::CycleStart).await
    }

    /// Ctrl-X. Positions are kept unless GRBL was moving.
    pub async fn soft_reset(&self) -> Result<(), DriverError> {
        let mut link = self.link.lock().await;
        link.send_realtime(Realtime::SoftReset).await?;
        let drained = link.drain(self.drain_window).await?;
        // The greeting can arrive after the drain window.
        link.stale = true;
        for line in drained {
            match GrblResponse::parse(&line) {
                GrblResponse::Greeting(version) => tracing::info!("GRBL {} reset", version),
                GrblResponse::Alarm(_) => tracing::warn!("GRBL reported {} after reset", line),
                _ => {}
            }
        }
        Ok(())
    }

    /// Emergency stop: immediate reset. Machine position is lost if an axis
    /// was moving.
    pub async fn stop(&self) -> Result<(), DriverError> {
        tracing::warn!("Emergency stop requested");
        self.soft_reset().await
    }

    /// Feed hold, wait for the deceleration to finish, then reset, so the
    /// machine position survives.
    pub async fn controlled_stop(&self, poll_interval: Duration) -> Result<(), DriverError> {
        tracing::info!("Controlled stop requested");
        self.feed_hold().await?;
        let settle = async {
            loop {
                let report = self.status().await?;
                match report.state {
                    MachineState::Hold(0) | MachineState::Idle => return Ok::<_, DriverError>(()),
                    _ => sleep(poll_interval).await,
                }
            }
        };
        timeout(self.homing_timeout, settle)
            .await
            .map_err(|_| DriverError::Timeout(self.homing_timeout))??;
        self.soft_reset().await
    }

    /// Clear an alarm lock (`$X`).
    pub async fn alarm_reset(&self) -> Result<(), DriverError> {
        tracing::info!("Clearing GRBL alarm lock");
        self.exchange(command::UNLOCK, self.timeout).await.map(|_| ())
    }

    /// Read all `$` settings (`$$`).
    pub async fn read_settings(&self) -> Result<GrblSettings, DriverError> {
        let responses = self.exchange(command::VIEW_SETTINGS, self.timeout).await?;
        Ok(GrblSettings::from_responses(&responses))
    }

    /// Every setting value implied by the configuration.
    pub fn desired_settings(&self) -> BTreeMap<u16, f64> {
        grbl_settings::desired_settings(&self.axes, &self.global)
    }

    /// Write the settings that differ from the configuration. Each write
    /// goes to GRBL's EEPROM, so unchanged values are skipped. Returns the
    /// number of settings written.
    pub async fn write_settings(&self) -> Result<usize, DriverError> {
        let current = self.read_settings().await?;
        let mismatches = grbl_settings::compare(&self.desired_settings(), &current);
        for mismatch in &mismatches {
            tracing::info!("Writing {}", command::write_setting(mismatch.number, mismatch.expected));
            self.exchange(
                &command::write_setting(mismatch.number, mismatch.expected),
                self.timeout,
            )
            .await?;
        }
        tracing::info!("{} GRBL setting(s) written", mismatches.len());
        Ok(mismatches.len())
    }

    /// Check that GRBL holds the configured settings.
    pub async fn verify_settings(&self) -> Result<(), DriverError> {
        let current = self.read_settings().await?;
        let mismatches = grbl_settings::compare(&self.desired_settings(), &current);
        if mismatches.is_empty() {
            tracing::info!("GRBL settings match configuration");
            Ok(())
        } else {
            for mismatch in &mismatches {
                tracing::warn!("{}", mismatch);
            }
            Err(DriverError::SettingMismatch(mismatches))
        }
    }

    /// Send one raw line and wait for its acknowledgement. Returns the
    /// informational responses received before the `ok`.
    pub async fn send_command(&self, line: &str) -> Result<Vec<GrblResponse>, DriverError> {
        let line = line.trim();
        if line.is_empty() || line.contains(['\r', '\n']) {
            return Err(DriverError::InvalidCommand(line.to_string()));
        }
        self.exchange(line, self.timeout).await
    }

    /// Close the channel. Dropping the driver also releases the port.
    pub async fn close(self) -> Result<(), DriverError> {
        let mut link = self.link.into_inner();
        link.channel.close().await?;
        tracing::info!("GRBL connection closed");
        Ok(())
    }

    async fn exchange(&self, line: &str, wait: Duration) -> Result<Vec<GrblResponse>, DriverError> {
        let mut link = self.link.lock().await;
        link.resync(self.drain_window).await?;
        link.stale = true;
        link.send_line(line).await?;

        let deadline = Instant::now() + wait;
        let mut received = Vec::new();
        loop {
            let raw = link.read_before(deadline, wait).await?;
            let raw = raw.trim();
            match GrblResponse::parse(raw) {
                GrblResponse::Ok => {
                    link.stale = false;
                    return Ok(received);
                }
                GrblResponse::Error(code) => {
                    link.stale = false;
                    tracing::warn!(
                        "GRBL rejected '{}': {} ({})",
                        line,
                        raw,
                        code.map(error_description).unwrap_or("no description")
                    );
                    return Err(DriverError::Device(raw.to_string()));
                }
                GrblResponse::Alarm(_) => return Err(DriverError::alarm(raw)),
                response if response.is_unsolicited() => {
                    tracing::debug!("Skipping unsolicited line: {}", raw);
                }
                response => received.push(response),
            }
        }
    }
}

impl<C> std::fmt::Debug for GrblDriver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrblDriver")
            .field("axes", &self.axes.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("homing_timeout", &self.homing_timeout)
            .finish()
    }
}
