//! 测试装置主入口
//! 加载配置并运行安装验证场景

use sdk_testware::{config::HarnessConfig, scenario::InstallAndVerify, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("sdk-testware {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env.development > .env
    // CI 环境应该直接设置环境变量，不依赖 .env 文件
    if let Ok(path) = std::env::var("SDK_ENV") {
        dotenv::from_filename(format!(".env.{}", path)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    // 1. 加载配置
    let config = HarnessConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "SDK testware starting..."
    );

    // 3. 运行安装验证场景
    let scenario = InstallAndVerify::new(config);
    if let Err(e) = scenario.run().await {
        tracing::error!(error = %e, "Scenario failed");
        return Err(e.into());
    }

    tracing::info!("SDK testware finished");
    Ok(())
}

/// 打印帮助信息
fn print_help() {
    println!("sdk-testware {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: sdk-testware [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 SDK_ 前缀的环境变量完成");
    println!("  例如 SDK_DIRECTOR__HOST、SDK_BUILD__BUILD_MANAGER_URL");
}
