use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use strike_engine::core::config_loader;
use strike_engine::core::engine::Engine;
use strike_engine::core::progress::Progress;
use strike_engine::core::report;
use strike_engine::models::args::Args;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_target(false)
        .init();

    let args = Args::parse();

    if args.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        exit(0);
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            eprintln!("错误: 必须通过 --config 指定配置文件");
            eprintln!();
            eprintln!("用法: strike-engine --config <config.json> [--workers N] [--output text|json|html] [--verbose]");
            exit(1);
        }
    };

    let config = match config_loader::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("配置加载失败: {:#}", e);
            exit(1);
        }
    };

    // 只做校验
    if args.test_only {
        println!("配置合法: {} 个用例", config.tests.len());
        exit(0);
    }

    // 只有text输出带进度条
    let progress = if args.output == "text" {
        Some(Progress::new(config.total_request_estimate()))
    } else {
        None
    };

    let suite_name = config.name.clone();
    let engine = Engine::new(args.workers, progress, args.verbose);
    let summary = engine.run(Arc::new(config)).await;

    match args.output.as_str() {
        "json" => {
            if let Err(e) = report::print_json_report(&summary) {
                eprintln!("生成json报告失败: {:#}", e);
                exit(1);
            }
        }
        "html" => {
            println!("{}", report::render_html_report(&summary, &suite_name));
        }
        _ => report::print_text_report(&summary),
    }

    // 有失败请求或run级错误都算整体失败
    if !summary.is_success() {
        exit(1);
    }
}
