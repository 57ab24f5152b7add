//! SSH 执行模块
//! 连接配置、传输抽象与远程命令运行器

pub mod config;
pub mod runner;
pub mod transport;

pub use config::{HostKeyVerification, SshAuth, SshConfig};
pub use runner::{CommandResult, RemoteCommandRunner};
pub use transport::{ChannelEvent, ExecChannel, FileTransfer, RusshTransport, Transport};
