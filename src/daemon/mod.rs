/*!
 * Daemon Module
 * Long-lived job server that hands open channels to one worker per job
 */

pub mod command;
pub mod server;
pub mod session;

// Re-exports
pub use command::{read_command, write_command};
pub use server::{bind_control_socket, daemonize, reap_children, serve, start, DaemonOutcome};
pub use session::{reconcile, Session, SessionReport};
