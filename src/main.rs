use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use autograder_config::{AppConfig, LogFormat};
use autograder_domain::{
    Assignment, GradeRepository, ScoreSummary, Submission, SubmissionRepository,
};
use autograder_infrastructure::{DatabaseManager, SqliteGradeRepository, SqliteSubmissionRepository};
use autograder_worker::AutogradingService;
use clap::{Arg, ArgMatches, Command};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod shutdown;

use shutdown::ShutdownManager;

/// serve 模式下等待队列排空的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn cli() -> Command {
    Command::new("autograder")
        .version(env!("CARGO_PKG_VERSION"))
        .about("笔记本自动评分服务")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认路径查找")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(
            Command::new("grade")
                .about("对单个提交执行一次完整评分并输出成绩")
                .arg(
                    Arg::new("assignment")
                        .long("assignment")
                        .value_name("FILE")
                        .help("作业定义JSON文件")
                        .required(true),
                )
                .arg(
                    Arg::new("submission")
                        .long("submission")
                        .value_name("FILE")
                        .help("学生提交JSON文件")
                        .required(true),
                ),
        )
        .subcommand(Command::new("serve").about("启动评分服务，直到收到关闭信号"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = match format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
    }

    init_logging(&config.observability.log_level, config.observability.log_format)?;

    info!("启动自动评分系统");
    info!(
        "执行器: {}, Worker数量: {}, 队列容量: {}",
        config.autograde.executor.kind, config.autograde.workers, config.autograde.queue_capacity
    );

    let database = DatabaseManager::new(&config.database)
        .await
        .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
    database.migrate().await.context("数据库迁移失败")?;

    let result = match matches.subcommand() {
        Some(("grade", args)) => run_grade(&config, &database, args).await,
        Some(("serve", _)) => run_serve(&config, &database).await,
        _ => Err(anyhow::anyhow!("未知的子命令")),
    };

    database.close().await;
    info!("自动评分系统已退出");
    result
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        LogFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &str) -> Result<T> {
    let content = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("读取文件失败: {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("解析JSON失败: {path}"))
}

fn build_service(config: &AppConfig, database: &DatabaseManager) -> Result<AutogradingService> {
    let repository = Arc::new(SqliteGradeRepository::new(database.pool().clone()));
    AutogradingService::builder(config.autograde.clone(), repository)
        .build()
        .context("创建自动评分服务失败")
}

async fn run_grade(config: &AppConfig, database: &DatabaseManager, args: &ArgMatches) -> Result<()> {
    let assignment_path = args
        .get_one::<String>("assignment")
        .context("缺少 --assignment 参数")?;
    let submission_path = args
        .get_one::<String>("submission")
        .context("缺少 --submission 参数")?;

    let assignment: Assignment = read_json(assignment_path)?;
    let submission: Submission = read_json(submission_path)?;
    let submission_id = submission.id.clone();

    SqliteSubmissionRepository::new(database.pool().clone())
        .register(&submission)
        .await
        .context("登记提交失败")?;

    let service = build_service(config, database)?;
    service.start().await;
    let job_id = service
        .submit_for_grading(assignment.clone(), submission)
        .await
        .context("提交评分任务失败")?;
    info!("评分任务已提交: {}", job_id);

    service.wait_idle().await;
    service.stop().await;

    let grades = SqliteGradeRepository::new(database.pool().clone())
        .find_grades_by_submission(&submission_id)
        .await
        .context("读取成绩失败")?;
    if grades.is_empty() {
        warn!("提交 {} 没有产生任何成绩", submission_id);
    }

    let summary = ScoreSummary::compute(&assignment, &grades);
    let report = serde_json::json!({
        "submission_id": submission_id,
        "job_id": job_id,
        "grades": grades,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_serve(config: &AppConfig, database: &DatabaseManager) -> Result<()> {
    if !config.autograde.enabled {
        return Err(anyhow::anyhow!("自动评分被禁用，请检查配置"));
    }

    let service = build_service(config, database)?;
    service.start().await;
    info!("自动评分服务已启动，等待关闭信号");

    let shutdown_manager = ShutdownManager::new();
    let mut shutdown_rx = shutdown_manager.subscribe();
    shutdown_manager.listen_for_signals();
    let _ = shutdown_rx.recv().await;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown::drain_and_stop(&service, DRAIN_TIMEOUT).await;
    Ok(())
}
