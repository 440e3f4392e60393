//! Test doubles shared by the unit tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Read;

use crate::clock::Clock;
use crate::config::InternetConfig;
use crate::messaging::PubSubSession;
use crate::network::WifiLink;
use crate::power::SupplyVoltage;
use crate::update::{FirmwareSink, UpdateService};

/// Shared fake time in nanoseconds, advanced only by [`RecordingDelay`].
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    nanos: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.nanos.get() / 1_000_000
    }

    fn advance_ns(&self, ns: u64) {
        self.nanos.set(self.nanos.get() + ns);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now()
    }
}

/// Delay that returns immediately, records the request and advances the
/// shared clock.
pub struct RecordingDelay {
    clock: FakeClock,
    delays_ns: Vec<u64>,
}

impl RecordingDelay {
    pub fn new(clock: &FakeClock) -> Self {
        Self {
            clock: clock.clone(),
            delays_ns: Vec::new(),
        }
    }

    pub fn delays_ms(&self) -> Vec<u32> {
        self.delays_ns
            .iter()
            .map(|ns| (ns / 1_000_000) as u32)
            .collect()
    }

    fn record(&mut self, ns: u64) {
        self.delays_ns.push(ns);
        self.clock.advance_ns(ns);
    }
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.record(u64::from(ns));
    }

    async fn delay_us(&mut self, us: u32) {
        self.record(u64::from(us) * 1_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.record(u64::from(ms) * 1_000_000);
    }
}

/// WiFi link that reports "connected" after a fixed number of status checks.
pub struct ScriptedLink {
    connect_after: Option<u32>,
    fail_begin: bool,
    pub status_checks: u32,
    pub joined_ssid: Option<String>,
}

impl ScriptedLink {
    pub fn connects_after(checks: u32) -> Self {
        Self {
            connect_after: Some(checks),
            fail_begin: false,
            status_checks: 0,
            joined_ssid: None,
        }
    }

    pub fn never_connects() -> Self {
        Self {
            connect_after: None,
            ..Self::connects_after(0)
        }
    }

    pub fn rejects_begin() -> Self {
        Self {
            fail_begin: true,
            ..Self::never_connects()
        }
    }
}

impl WifiLink for ScriptedLink {
    type Error = ();

    fn begin(&mut self, credentials: &InternetConfig<'_>) -> Result<(), ()> {
        if self.fail_begin {
            return Err(());
        }
        self.joined_ssid = Some(credentials.ssid.into());
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        let connected = self
            .connect_after
            .is_some_and(|after| self.status_checks >= after);
        self.status_checks += 1;
        connected
    }
}

/// Broker session that refuses a number of connects before accepting.
pub struct ScriptedSession {
    refusals_left: Option<u32>,
    pub connected: bool,
    pub fail_publishes: bool,
    pub connect_calls: u32,
    pub publish_calls: u32,
    pub poll_calls: u32,
    pub published: Vec<(String, Vec<u8>)>,
}

impl ScriptedSession {
    pub fn accepting_after(refusals: u32) -> Self {
        Self {
            refusals_left: Some(refusals),
            connected: false,
            fail_publishes: false,
            connect_calls: 0,
            publish_calls: 0,
            poll_calls: 0,
            published: Vec::new(),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refusals_left: None,
            ..Self::accepting_after(0)
        }
    }
}

impl PubSubSession for ScriptedSession {
    type Error = ();

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), ()> {
        self.connect_calls += 1;
        match self.refusals_left.as_mut() {
            Some(0) => {
                self.connected = true;
                Ok(())
            }
            Some(left) => {
                *left -= 1;
                Err(())
            }
            None => Err(()),
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ()> {
        self.publish_calls += 1;
        if self.fail_publishes {
            return Err(());
        }
        self.published.push((topic.into(), payload.to_vec()));
        Ok(())
    }

    async fn poll(&mut self) -> Result<(), ()> {
        self.poll_calls += 1;
        Ok(())
    }
}

pub struct FixedSupply {
    millivolts: u16,
    pub reads: u32,
}

impl FixedSupply {
    pub fn new(millivolts: u16) -> Self {
        Self {
            millivolts,
            reads: 0,
        }
    }
}

impl SupplyVoltage for FixedSupply {
    fn read_millivolts(&mut self) -> u16 {
        self.reads += 1;
        self.millivolts
    }
}

/// Active-low button replaying scripted levels, then holding the last one.
pub struct ScriptedButton {
    pressed: VecDeque<bool>,
    hold: bool,
    pub reads: u32,
}

impl ScriptedButton {
    pub fn pressed() -> Self {
        Self::script(&[], true)
    }

    pub fn released() -> Self {
        Self::script(&[], false)
    }

    pub fn pressed_once() -> Self {
        Self::script(&[true], false)
    }

    fn script(pressed: &[bool], hold: bool) -> Self {
        Self {
            pressed: pressed.iter().copied().collect(),
            hold,
            reads: 0,
        }
    }
}

impl ErrorType for ScriptedButton {
    type Error = Infallible;
}

impl InputPin for ScriptedButton {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        self.reads += 1;
        Ok(self.pressed.pop_front().unwrap_or(self.hold))
    }
}

#[derive(Default)]
pub struct RecordingPin {
    pub levels: Vec<PinState>,
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.levels.push(PinState::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.levels.push(PinState::High);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingUpdateService {
    pub calls: u32,
}

impl UpdateService for CountingUpdateService {
    async fn service(&mut self) {
        self.calls += 1;
    }
}

/// Request body handed out in small chunks so readers see split input.
pub struct ChunkedBody {
    input: Vec<u8>,
    read_pos: usize,
    chunk: usize,
}

impl ChunkedBody {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            read_pos: 0,
            chunk: 100,
        }
    }
}

impl embedded_io_async::ErrorType for ChunkedBody {
    type Error = Infallible;
}

impl Read for ChunkedBody {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let remaining = &self.input[self.read_pos..];
        let n = remaining.len().min(buf.len()).min(self.chunk);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

/// Firmware sink collecting the image in memory.
#[derive(Default)]
pub struct MemorySink {
    pub began: bool,
    pub expected_len: Option<usize>,
    pub image: Vec<u8>,
    pub finished: bool,
    pub reject_finish: bool,
}

impl FirmwareSink for MemorySink {
    type Error = &'static str;

    fn begin(&mut self, image_len: usize) -> Result<(), Self::Error> {
        self.began = true;
        self.expected_len = Some(image_len);
        Ok(())
    }

    fn write(&mut self, offset: usize, chunk: &[u8]) -> Result<(), Self::Error> {
        if offset != self.image.len() {
            return Err("out of order write");
        }
        self.image.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        if self.reject_finish {
            return Err("image rejected");
        }
        self.finished = true;
        Ok(())
    }
}
