pub mod discovery;
pub mod driver;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use driver::{Activity, MachineDriver, MachineState, MoveOrder};
pub use protocol::Position;
pub use sim::{SimulatedController, SimulatedHandle};
pub use transport::{SerialTransport, Transport};
