#![doc = "Bubbles Harness\n\nAn in-memory radio medium for exercising the runtime without hardware.\nEvery [`SimulatedRadio`] joined to a [`RadioMesh`] can see, connect to and\nwrite to the others, and records each call it receives so tests can assert\non exactly what the runtime asked the radio to do."]

pub mod mesh;
pub mod radio;

pub use mesh::{Faults, RadioMesh};
pub use radio::{RadioCall, SimulatedRadio};
