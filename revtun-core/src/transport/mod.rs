//! TCP transport helpers: dialing, socket tuning, control writers and splicing

pub mod control_writer;
pub mod socket_tuning;
pub mod splice;
pub mod tcp;

pub use control_writer::run_control_writer;
pub use socket_tuning::{configure_socket, configure_socket_silent, SocketRole};
pub use splice::{splice, SpliceEnd, SpliceStats, SPLICE_BUFFER_SIZE};
pub use tcp::TcpTransport;
