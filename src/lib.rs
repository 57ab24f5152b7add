//! 云原生 SDK 集成测试装置
//! 构建自定义 FM/PM SDK 交付物，安装到 cENM 环境并校验部署结果

pub mod archive;
pub mod builder;
pub mod charts;
pub mod config;
pub mod error;
pub mod fetch;
pub mod helm;
pub mod kube;
pub mod maven;
pub mod output;
pub mod process;
pub mod registry;
pub mod scenario;
pub mod ssh;
pub mod telemetry;
