//! Demo Mode - Simulated ECM
//!
//! Answers every request with a packet built from a simulated engine idling at
//! ~850 RPM with random throttle blips. Values are encoded through the active
//! definition, so each parameter decodes to something plausible for its title.

use byteorder::{BigEndian, ByteOrder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::time::Instant;
use tracing::debug;

use crate::definition::Definition;
use crate::protocol::command::verify_checksum;
use crate::protocol::{OpenOptions, Transport, TransportProvider, MAX_PACKET_SIZE};

const IDLE_RPM: f64 = 850.0;
const RAMP_UP_MS: u64 = 300;
const HOLD_MS: u64 = 200;
const RAMP_DOWN_MS: u64 = 800;

/// One set of simulated sensor values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineReading {
    /// Engine speed
    pub rpm: f64,
    /// Throttle position, percent
    pub tps: f64,
    /// Manifold absolute pressure, kPa
    pub map: f64,
    /// Coolant temperature, °C
    pub coolant: f64,
    /// Intake air temperature, °C
    pub iat: f64,
    /// Battery voltage
    pub battery: f64,
    /// Spark advance, degrees
    pub advance: f64,
}

impl EngineReading {
    /// Value for a parameter, chosen by keywords in its title. Unknown titles read 0.
    pub fn value_for_title(&self, title: &str) -> f64 {
        let title = title.to_uppercase();
        let has = |keys: &[&str]| keys.iter().any(|k| title.contains(k));

        if has(&["RPM"]) {
            self.rpm
        } else if has(&["TPS", "THROTTLE"]) {
            self.tps
        } else if has(&["IAT", "INTAKE", "AIR TEMP", "MAT"]) {
            self.iat
        } else if has(&["COOLANT", "CLT", "TEMP"]) {
            self.coolant
        } else if has(&["MAP", "PRESSURE"]) {
            self.map
        } else if has(&["VOLT", "BATT"]) {
            self.battery
        } else if has(&["SPARK", "ADVANCE", "TIMING"]) {
            self.advance
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlipState {
    Idle,
    RampUp { start_ms: u64 },
    Hold { start_ms: u64 },
    RampDown { start_ms: u64 },
}

/// Simulated engine
pub struct DemoEngine {
    /// First update time (ms)
    start_time_ms: Option<u64>,
    last_update_ms: Option<u64>,
    /// Time of next throttle blip (ms from start)
    next_blip_at_ms: u64,
    blip_state: BlipState,
    /// Smoothed RPM
    current_rpm: f64,
    blip_target_rpm: f64,
    rng: StdRng,
}

impl Default for DemoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoEngine {
    /// Engine with a random blip schedule
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Engine with a reproducible blip schedule
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let first_blip = rng.gen_range(8000..15000);
        Self {
            start_time_ms: None,
            last_update_ms: None,
            next_blip_at_ms: first_blip,
            blip_state: BlipState::Idle,
            current_rpm: IDLE_RPM,
            blip_target_rpm: IDLE_RPM,
            rng,
        }
    }

    /// Advance the simulation to `elapsed_ms` and read the sensors
    pub fn update(&mut self, elapsed_ms: u64) -> EngineReading {
        let start = *self.start_time_ms.get_or_insert(elapsed_ms);
        let sim_time = elapsed_ms.saturating_sub(start);
        let delta_ms = self
            .last_update_ms
            .map(|last| elapsed_ms.saturating_sub(last))
            .unwrap_or(0);
        self.last_update_ms = Some(elapsed_ms);

        self.update_blip_state(sim_time);

        let target_rpm = self.target_rpm(sim_time);
        // RPM/sec
        let rpm_rate = if target_rpm > self.current_rpm { 8000.0 } else { 3000.0 };
        let max_change = rpm_rate * (delta_ms as f64 / 1000.0);
        self.current_rpm += (target_rpm - self.current_rpm).clamp(-max_change, max_change);

        let t = sim_time as f64 / 1000.0;
        let idle_wobble = if self.blip_state == BlipState::Idle {
            20.0 * (t * 2.5).sin() + 10.0 * (t * 7.3).sin()
        } else {
            0.0
        };
        let rpm = (self.current_rpm + idle_wobble).max(0.0);

        let blip_progress = if self.blip_target_rpm > IDLE_RPM {
            ((self.current_rpm - IDLE_RPM) / (self.blip_target_rpm - IDLE_RPM)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let tps = match self.blip_state {
            BlipState::Idle => 1.5 + (t * 0.3).sin().abs(),
            BlipState::RampUp { .. } => 2.0 + blip_progress * 45.0,
            BlipState::Hold { .. } => 45.0 + 5.0 * (t * 3.0).sin(),
            BlipState::RampDown { .. } => 2.0 + blip_progress * 40.0,
        };

        let map = if rpm < 1000.0 {
            35.0 + 10.0 * (1.0 - rpm / 1000.0)
        } else {
            25.0 + rpm / 100.0
        };

        EngineReading {
            rpm,
            tps: tps.clamp(0.0, 100.0),
            map: map.clamp(20.0, 105.0),
            // Warming up from ambient
            coolant: 20.0 + 70.0 * (1.0 - (-t / 120.0).exp()),
            iat: 25.0 + 5.0 * (t * 0.1).sin(),
            battery: 13.8 + 0.2 * (t * 0.5).sin(),
            advance: (10.0 + rpm / 200.0 + 3.0 * (t * 0.7).sin()).clamp(-10.0, 45.0),
        }
    }

    fn update_blip_state(&mut self, sim_time: u64) {
        match self.blip_state {
            BlipState::Idle => {
                if sim_time >= self.next_blip_at_ms {
                    self.blip_target_rpm = self.rng.gen_range(2000.0..4000.0);
                    self.blip_state = BlipState::RampUp { start_ms: sim_time };
                }
            }
            BlipState::RampUp { start_ms } => {
                if sim_time >= start_ms + RAMP_UP_MS {
                    self.blip_state = BlipState::Hold { start_ms: sim_time };
                }
            }
            BlipState::Hold { start_ms } => {
                if sim_time >= start_ms + HOLD_MS {
                    self.blip_state = BlipState::RampDown { start_ms: sim_time };
                }
            }
            BlipState::RampDown { start_ms } => {
                if sim_time >= start_ms + RAMP_DOWN_MS {
                    self.blip_state = BlipState::Idle;
                    self.next_blip_at_ms = sim_time + self.rng.gen_range(8000..15000);
                }
            }
        }
    }

    fn target_rpm(&self, sim_time: u64) -> f64 {
        match self.blip_state {
            BlipState::Idle => IDLE_RPM,
            BlipState::RampUp { start_ms } => {
                let progress = ((sim_time - start_ms) as f64 / RAMP_UP_MS as f64).min(1.0);
                IDLE_RPM + (self.blip_target_rpm - IDLE_RPM) * progress
            }
            BlipState::Hold { .. } => self.blip_target_rpm,
            BlipState::RampDown { start_ms } => {
                let progress = ((sim_time - start_ms) as f64 / RAMP_DOWN_MS as f64).min(1.0);
                self.blip_target_rpm + (IDLE_RPM - self.blip_target_rpm) * progress
            }
        }
    }
}

/// Encode `reading` into a response packet laid out by `definition`.
///
/// Returns `None` when the layout does not fit in [`MAX_PACKET_SIZE`] bytes.
pub fn encode_packet(definition: &Definition, reading: &EngineReading) -> Option<Vec<u8>> {
    let len = definition.packet_len();
    if len > MAX_PACKET_SIZE {
        return None;
    }
    let mut packet = vec![0u8; len];
    for param in &definition.parameters {
        let raw = param.display_to_raw(reading.value_for_title(&param.title));
        let off = param.packet_offset;
        if param.byte_count == 2 {
            BigEndian::write_u16(&mut packet[off..off + 2], raw);
        } else {
            packet[off] = raw as u8;
        }
    }
    Some(packet)
}

/// Transport answering each request with a simulated packet
pub struct DemoTransport {
    definition: Definition,
    engine: DemoEngine,
    started: Instant,
    pending: bool,
}

impl DemoTransport {
    /// Simulated ECM speaking `definition`
    pub fn new(definition: Definition, engine: DemoEngine) -> Self {
        Self {
            definition,
            engine,
            started: Instant::now(),
            pending: false,
        }
    }
}

impl Transport for DemoTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        // A real ECM ignores frames with a bad checksum
        self.pending = verify_checksum(bytes);
        if !self.pending {
            debug!(len = bytes.len(), "demo ECM ignored corrupt request");
        }
        Ok(())
    }

    fn read(&mut self) -> io::Result<Vec<u8>> {
        // Nothing was asked, nothing arrives
        if !std::mem::take(&mut self.pending) {
            return Ok(Vec::new());
        }
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let reading = self.engine.update(elapsed_ms);
        encode_packet(&self.definition, &reading).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "definition '{}' needs a {}-byte packet, limit is {}",
                    self.definition.name,
                    self.definition.packet_len(),
                    MAX_PACKET_SIZE
                ),
            )
        })
    }
}

/// Opens [`DemoTransport`]s for a fixed definition
#[derive(Debug, Clone)]
pub struct DemoProvider {
    definition: Definition,
    seed: Option<u64>,
}

impl DemoProvider {
    /// Provider simulating `definition`
    pub fn new(definition: Definition) -> Self {
        Self {
            definition,
            seed: None,
        }
    }

    /// Use a fixed seed for the blip schedule
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl TransportProvider for DemoProvider {
    fn open(&mut self, options: &OpenOptions) -> io::Result<Box<dyn Transport>> {
        debug!(definition = %self.definition.name, baud_rate = options.baud_rate, "demo ECM opened");
        let engine = match self.seed {
            Some(seed) => DemoEngine::with_seed(seed),
            None => DemoEngine::new(),
        };
        Ok(Box::new(DemoTransport::new(self.definition.clone(), engine)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use crate::definition::{
        DefinitionSource, JsonDefinitionSource, ParameterDefinition, DEFAULT_REQUEST_COMMAND,
    };
    use crate::protocol::{Connection, TransportError};

    fn definition() -> Definition {
        Definition::new("demo")
            .with_parameter(ParameterDefinition::new("rpm", "Engine RPM", 0, 2))
            .with_parameter(
                ParameterDefinition::new("clt", "Coolant Temp", 2, 1).with_conversion(0.75, -40.0),
            )
            .with_parameter(ParameterDefinition::new("tps", "TPS", 3, 1))
            .with_parameter(ParameterDefinition::new("x", "Mystery", 4, 1))
    }

    #[test]
    fn test_idle_rpm_range() {
        let mut engine = DemoEngine::with_seed(7);
        // The first blip is at least 8 s away
        for ms in (0..3000).step_by(100) {
            let rpm = engine.update(ms).rpm;
            assert!(rpm > 700.0 && rpm < 1000.0, "RPM {} out of idle range", rpm);
        }
    }

    #[test]
    fn test_coolant_warmup() {
        let mut engine = DemoEngine::with_seed(7);
        let start = engine.update(1000).coolant;
        let later = engine.update(61_000).coolant;
        assert!(later > start, "coolant should warm up: {start} vs {later}");
        assert!(later < 90.0);
    }

    #[test]
    fn test_title_keywords() {
        let reading = DemoEngine::with_seed(1).update(0);
        assert_eq!(reading.value_for_title("Engine Speed (rpm)"), reading.rpm);
        assert_eq!(reading.value_for_title("Intake Air Temp"), reading.iat);
        assert_eq!(reading.value_for_title("Coolant Temp"), reading.coolant);
        assert_eq!(reading.value_for_title("Mystery"), 0.0);
    }

    #[test]
    fn test_packet_decodes_to_reading() {
        let def = definition();
        let reading = DemoEngine::with_seed(3).update(0);
        let packet = encode_packet(&def, &reading).unwrap();
        assert_eq!(packet.len(), def.packet_len());

        let sample = decode(&def, &packet);
        assert!((sample.get("rpm").unwrap() - reading.rpm).abs() <= 0.5);
        assert!((sample.get("clt").unwrap() - reading.coolant).abs() <= 0.75);
        assert_eq!(sample.get("x"), Some(0.0));
    }

    #[test]
    fn test_read_without_request_is_empty() {
        let mut transport = DemoTransport::new(definition(), DemoEngine::with_seed(1));
        assert!(transport.read().unwrap().is_empty());
        transport.write(&DEFAULT_REQUEST_COMMAND).unwrap();
        assert_eq!(transport.read().unwrap().len(), 5);
        assert!(transport.read().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_request_gets_no_reply() {
        let mut transport = DemoTransport::new(definition(), DemoEngine::with_seed(1));
        transport.write(&[0xF4, 0x57, 0x01, 0x00, 0xB5]).unwrap();
        assert!(transport.read().unwrap().is_empty());
    }

    #[test]
    fn test_provider_through_connection() {
        let def = definition();
        let mut provider = DemoProvider::new(def.clone()).with_seed(11);
        let mut conn = Connection::new();
        conn.open(&mut provider, OpenOptions::for_definition(Some(&def)))
            .unwrap();
        let packet = conn.exchange(&def.request_command).unwrap();
        assert_eq!(decode(&def, &packet).len(), 4);
    }

    #[test]
    fn test_oversized_layout_is_bus_error() {
        let text = r#"{
            "name": "far",
            "parameters": [
                {"id": "w", "title": "Word", "packetOffset": 18446744073709551615, "byteCount": 2}
            ]
        }"#;
        let def = JsonDefinitionSource.parse(text, "far.json").unwrap();
        assert!(decode(&def, &[1, 2, 3]).is_empty());
        assert!(encode_packet(&def, &DemoEngine::with_seed(1).update(0)).is_none());

        let mut provider = DemoProvider::new(def.clone()).with_seed(5);
        let mut conn = Connection::new();
        conn.open(&mut provider, OpenOptions::for_definition(Some(&def)))
            .unwrap();
        assert!(matches!(
            conn.exchange(&def.request_command),
            Err(TransportError::BusError(msg)) if msg.contains("limit is 512")
        ));
    }
}
