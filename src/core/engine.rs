use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedSender};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::core::aggregator::Aggregator;
use crate::core::dag::{self, TestDependency};
use crate::core::data_loader::{self, DataRow};
use crate::core::executor::RequestExecutor;
use crate::core::extractor::Extractor;
use crate::core::progress::Progress;
use crate::core::substitutor::Substitutor;
use crate::core::variable_store::VariableStore;
use crate::models::config::{Config, GlobalConfig, TestCase};
use crate::models::result::{DebugLog, TestResult};
use crate::models::summary::Summary;

// 一个job等于一次待执行的请求: 用例 + 可选数据行
#[derive(Clone)]
pub struct Job {
    pub config: Arc<Config>,
    pub test: TestCase,
    pub url: String,
    pub data_row: Option<DataRow>,
}

// 执行引擎，一次run对应一个实例
pub struct Engine {
    workers: usize,
    progress: Option<Progress>,
    verbose: bool,
    store: Arc<VariableStore>,
    substitutor: Arc<Substitutor>,
    extractor: Arc<Extractor>,
}

impl Engine {
    pub fn new(workers: usize, progress: Option<Progress>, verbose: bool) -> Self {
        let store = Arc::new(VariableStore::new());
        Engine {
            workers: workers.max(1),
            progress,
            verbose,
            substitutor: Arc::new(Substitutor::new(store.clone())),
            extractor: Arc::new(Extractor::new(store.clone())),
            store,
        }
    }

    pub fn store(&self) -> Arc<VariableStore> {
        self.store.clone()
    }

    pub async fn run(&self, config: Arc<Config>) -> Summary {
        // 种子变量先入表
        if !config.global.variables.is_empty() {
            self.store.set_from_map(&config.global.variables);
        }

        if config.has_dependencies() {
            self.run_with_dag(config).await
        } else {
            self.run_flat(config).await
        }
    }

    // 无依赖的平铺执行: 生产者按模式产job，worker池消费
    async fn run_flat(&self, config: Arc<Config>) -> Summary {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(1000);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let (results_tx, mut results_rx) = mpsc::channel::<TestResult>(1000);

        let (log_tx, logger_handle, logs) = self.spawn_logger();
        let executor = Arc::new(RequestExecutor::new(
            self.substitutor.clone(),
            self.extractor.clone(),
            self.verbose,
            log_tx.clone(),
        ));

        // duration类运行按最长的用例时长兜底取消
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut cancel_keep = Some(cancel_tx);
        if config.is_duration_based() || config.has_mixed_mode() {
            let mut max_duration = config.global.duration;
            for test in &config.tests {
                if test.duration > max_duration {
                    max_duration = test.duration;
                }
            }
            if !max_duration.is_zero() {
                let tx = cancel_keep.take().unwrap();
                tokio::spawn(async move {
                    tokio::time::sleep(max_duration).await;
                    let _ = tx.send(true);
                });
            }
        }

        let mut worker_handles = Vec::new();
        for _ in 0..self.workers {
            worker_handles.push(tokio::spawn(worker_loop(
                executor.clone(),
                self.store.clone(),
                jobs_rx.clone(),
                results_tx.clone(),
                cancel_rx.clone(),
            )));
        }
        drop(results_tx);

        {
            let config = config.clone();
            let cancel_rx = cancel_rx.clone();
            tokio::spawn(async move {
                generate_jobs(config, jobs_tx, cancel_rx).await;
            });
        }

        // 单消费者收结果，worker全退结果通道才会关
        let mut aggregator = Aggregator::new();
        while let Some(result) = results_rx.recv().await {
            aggregator.add(&result);
            if let Some(p) = &self.progress {
                p.inc();
            }
        }
        join_all(worker_handles).await;

        let mut summary = aggregator.finalize_flat();
        if let Some(p) = &self.progress {
            p.finish();
        }

        drop(cancel_keep);
        drop(executor);
        self.flush_logs(log_tx, logger_handle, logs, &mut summary).await;
        summary
    }

    // 有依赖时按phase推进，上一层全部完成才开下一层
    async fn run_with_dag(&self, config: Arc<Config>) -> Summary {
        let (log_tx, logger_handle, logs) = self.spawn_logger();
        let executor = Arc::new(RequestExecutor::new(
            self.substitutor.clone(),
            self.extractor.clone(),
            self.verbose,
            log_tx.clone(),
        ));

        let run_start = Instant::now();

        let deps: Vec<TestDependency> = config
            .tests
            .iter()
            .map(|t| TestDependency {
                name: t.name.clone(),
                depends_on: t.depends_on.clone(),
            })
            .collect();

        let plan = match dag::build_plan(&deps) {
            Ok(plan) => plan,
            Err(e) => {
                // 规划失败整个run作废，错误原样塞进summary
                let mut summary = Summary::default();
                summary.errors.insert(e.to_string(), 1);
                if let Some(p) = &self.progress {
                    p.finish();
                }
                drop(executor);
                self.flush_logs(log_tx, logger_handle, logs, &mut summary).await;
                return summary;
            }
        };

        let test_by_name: HashMap<String, TestCase> = config
            .tests
            .iter()
            .map(|t| (t.name.clone(), t.clone()))
            .collect();

        let mut failed_tests: HashSet<String> = HashSet::new();
        let mut aggregator = Aggregator::new();

        for phase in &plan.phases {
            let mut executable: Vec<String> = Vec::new();

            for test_name in phase {
                let test = &test_by_name[test_name];
                // 依赖里有失败的直接跳过，并且自己也算失败让下游继续跳
                if let Some(failed_dep) = test
                    .depends_on
                    .iter()
                    .find(|dep| failed_tests.contains(dep.as_str()))
                {
                    let url = test.full_url(&config.global.base_url);
                    let rows = data_loader::data_rows(test);
                    let iterations = test.effective_iterations(&config.global) as usize;
                    let skip_count = if rows.is_empty() {
                        iterations
                    } else {
                        rows.len() * iterations
                    };

                    for _ in 0..skip_count {
                        let mut result = TestResult::new(&test.name, &url, &test.method);
                        result.skipped = true;
                        result.skip_reason = format!("dependency '{}' failed", failed_dep);
                        aggregator.add(&result);
                        if let Some(p) = &self.progress {
                            p.inc();
                        }
                    }
                    failed_tests.insert(test_name.clone());
                } else {
                    executable.push(test_name.clone());
                }
            }

            if executable.is_empty() {
                continue;
            }

            let mut total_jobs = 0usize;
            for name in &executable {
                let test = &test_by_name[name];
                let rows = data_loader::data_rows(test);
                let iterations = test.effective_iterations(&config.global) as usize;
                total_jobs += if rows.is_empty() {
                    iterations
                } else {
                    rows.len() * iterations
                };
            }
            if total_jobs == 0 {
                continue;
            }

            // 通道容量开到本阶段job总数，投递不会被阻塞
            let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(total_jobs);
            let jobs_rx = Arc::new(Mutex::new(jobs_rx));
            let (results_tx, mut results_rx) = mpsc::channel::<TestResult>(total_jobs);

            let worker_count = self.workers.min(total_jobs).max(1);
            let mut handles = Vec::new();
            for _ in 0..worker_count {
                handles.push(tokio::spawn(phase_worker(
                    executor.clone(),
                    self.store.clone(),
                    jobs_rx.clone(),
                    results_tx.clone(),
                )));
            }
            drop(results_tx);

            for name in &executable {
                let test = &test_by_name[name];
                let url = test.full_url(&config.global.base_url);
                let rows = data_loader::data_rows(test);
                let iterations = test.effective_iterations(&config.global);

                if rows.is_empty() {
                    for _ in 0..iterations {
                        let job = Job {
                            config: config.clone(),
                            test: test.clone(),
                            url: url.clone(),
                            data_row: None,
                        };
                        if jobs_tx.send(job).await.is_err() {
                            break;
                        }
                    }
                } else {
                    for row in &rows {
                        for _ in 0..iterations {
                            let job = Job {
                                config: config.clone(),
                                test: test.clone(),
                                url: url.clone(),
                                data_row: Some(row.clone()),
                            };
                            if jobs_tx.send(job).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            drop(jobs_tx);

            // 等本阶段全部结果回来再进下一阶段
            while let Some(result) = results_rx.recv().await {
                if !result.skipped && !result.success {
                    failed_tests.insert(result.test_name.clone());
                }
                aggregator.add(&result);
                if let Some(p) = &self.progress {
                    p.inc();
                }
            }
            join_all(handles).await;
        }

        let mut summary = aggregator.finalize_from_start(run_start);
        if let Some(p) = &self.progress {
            p.finish();
        }
        drop(executor);
        self.flush_logs(log_tx, logger_handle, logs, &mut summary).await;
        summary
    }

    // verbose模式起单独的日志任务，按到达顺序串行落盘
    #[allow(clippy::type_complexity)]
    fn spawn_logger(
        &self,
    ) -> (
        Option<UnboundedSender<DebugLog>>,
        Option<JoinHandle<()>>,
        Arc<StdMutex<Vec<DebugLog>>>,
    ) {
        let logs = Arc::new(StdMutex::new(Vec::new()));
        if !self.verbose {
            return (None, None, logs);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DebugLog>();
        let sink = logs.clone();
        // 只有text模式直接往终端打
        let print = self.progress.is_some();
        let handle = tokio::spawn(async move {
            while let Some(log) = rx.recv().await {
                if print {
                    print_debug_log(&log);
                }
                sink.lock().unwrap().push(log);
            }
        });
        (Some(tx), Some(handle), logs)
    }

    async fn flush_logs(
        &self,
        log_tx: Option<UnboundedSender<DebugLog>>,
        logger_handle: Option<JoinHandle<()>>,
        logs: Arc<StdMutex<Vec<DebugLog>>>,
        summary: &mut Summary,
    ) {
        // 发送端全部释放后日志任务自然退出，等它退完再拷贝
        drop(log_tx);
        if let Some(handle) = logger_handle {
            let _ = handle.await;
            summary.debug_logs = logs.lock().unwrap().drain(..).collect();
        }
    }
}

// 平铺模式的worker: 思考时间 -> 数据行入表 -> 执行 -> 间隔
async fn worker_loop(
    executor: Arc<RequestExecutor>,
    store: Arc<VariableStore>,
    jobs: Arc<Mutex<Receiver<Job>>>,
    results: Sender<TestResult>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                _ = cancelled(&mut cancel) => return,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => return,
                },
            }
        };

        let think = resolve_think_time(&job.test, &job.config.global);
        if !think.is_zero() {
            tokio::select! {
                _ = cancelled(&mut cancel) => return,
                _ = tokio::time::sleep(think) => {}
            }
        }

        if let Some(row) = &job.data_row {
            set_data_variables(&store, row);
        }

        let result = executor.execute(&job).await;
        if results.send(result).await.is_err() {
            return;
        }

        let delay = job.test.effective_delay(&job.config.global);
        if !delay.is_zero() {
            tokio::select! {
                _ = cancelled(&mut cancel) => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

// phase内的worker，DAG模式没有run级取消
async fn phase_worker(
    executor: Arc<RequestExecutor>,
    store: Arc<VariableStore>,
    jobs: Arc<Mutex<Receiver<Job>>>,
    results: Sender<TestResult>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => return,
            }
        };

        let think = resolve_think_time(&job.test, &job.config.global);
        if !think.is_zero() {
            tokio::time::sleep(think).await;
        }

        if let Some(row) = &job.data_row {
            set_data_variables(&store, row);
        }

        let result = executor.execute(&job).await;
        if results.send(result).await.is_err() {
            return;
        }

        let delay = job.test.effective_delay(&job.config.global);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

// 取消信号: 没取消就一直挂起，sender全释放也不误触发
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            if *rx.borrow() {
                return;
            }
            std::future::pending::<()>().await;
        }
    }
}

// 按配置模式产job
async fn generate_jobs(config: Arc<Config>, jobs: Sender<Job>, cancel: watch::Receiver<bool>) {
    if config.has_mixed_mode() {
        generate_mixed_mode_jobs(config, jobs, cancel).await;
    } else if config.is_duration_based() {
        generate_duration_based_jobs(config, jobs, cancel).await;
    } else {
        generate_iteration_based_jobs(config, jobs).await;
    }
}

async fn generate_iteration_based_jobs(config: Arc<Config>, jobs: Sender<Job>) {
    for test in &config.tests {
        let iterations = if test.iterations > 0 {
            test.iterations
        } else {
            config.global.iterations
        };
        let url = test.full_url(&config.global.base_url);
        let rows = data_loader::data_rows(test);

        if !rows.is_empty() {
            // 数据驱动: 每行数据各跑iterations次
            for row in &rows {
                for _ in 0..iterations {
                    let job = Job {
                        config: config.clone(),
                        test: test.clone(),
                        url: url.clone(),
                        data_row: Some(row.clone()),
                    };
                    if jobs.send(job).await.is_err() {
                        return;
                    }
                }
            }
        } else {
            for _ in 0..iterations {
                let job = Job {
                    config: config.clone(),
                    test: test.clone(),
                    url: url.clone(),
                    data_row: None,
                };
                if jobs.send(job).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn generate_duration_based_jobs(
    config: Arc<Config>,
    jobs: Sender<Job>,
    cancel: watch::Receiver<bool>,
) {
    let start = Instant::now();
    let mut handles = Vec::new();
    // 每个用例单独一个生产者，各自按自己的时长跑
    for test in config.tests.clone() {
        let config = config.clone();
        let jobs = jobs.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            duration_producer(config, test, jobs, cancel, start).await;
        }));
    }
    drop(jobs);
    join_all(handles).await;
}

async fn generate_mixed_mode_jobs(
    config: Arc<Config>,
    jobs: Sender<Job>,
    cancel: watch::Receiver<bool>,
) {
    let start = Instant::now();
    let mut handles = Vec::new();

    for test in config.tests.clone() {
        let config = config.clone();
        let jobs = jobs.clone();
        let cancel = cancel.clone();

        // 用例自己有时长、或者全局是时长而用例没配迭代，都按时长跑
        let duration_based = !test.duration.is_zero()
            || (test.duration.is_zero()
                && !config.global.duration.is_zero()
                && test.iterations == 0);

        if duration_based {
            handles.push(tokio::spawn(async move {
                duration_producer(config, test, jobs, cancel, start).await;
            }));
        } else {
            handles.push(tokio::spawn(async move {
                let iterations = if test.iterations > 0 {
                    test.iterations
                } else {
                    config.global.iterations
                };
                let url = test.full_url(&config.global.base_url);
                for _ in 0..iterations {
                    let job = Job {
                        config: config.clone(),
                        test: test.clone(),
                        url: url.clone(),
                        data_row: None,
                    };
                    if jobs.send(job).await.is_err() {
                        return;
                    }
                }
            }));
        }
    }

    drop(jobs);
    join_all(handles).await;
}

async fn duration_producer(
    config: Arc<Config>,
    test: TestCase,
    jobs: Sender<Job>,
    cancel: watch::Receiver<bool>,
    start: Instant,
) {
    let duration = test.effective_duration(&config.global);
    let end = start + duration;
    let url = test.full_url(&config.global.base_url);

    while Instant::now() < end && !*cancel.borrow() {
        let job = Job {
            config: config.clone(),
            test: test.clone(),
            url: url.clone(),
            data_row: None,
        };
        // 带超时的投递，worker饱和时退避10ms而不是干等
        match tokio::time::timeout(Duration::from_millis(10), jobs.send(job)).await {
            Ok(Err(_)) => return,
            _ => {}
        }
    }
}

// 思考时间解析顺序: 用例固定值 > 用例随机区间 > 全局固定值 > 全局随机区间
pub fn resolve_think_time(test: &TestCase, global: &GlobalConfig) -> Duration {
    if !test.think_time.is_zero() {
        return test.think_time;
    }
    if !test.think_time_min.is_zero() && !test.think_time_max.is_zero() {
        return random_duration(test.think_time_min, test.think_time_max);
    }
    if !global.think_time.is_zero() {
        return global.think_time;
    }
    if !global.think_time_min.is_zero() && !global.think_time_max.is_zero() {
        return random_duration(global.think_time_min, global.think_time_max);
    }
    Duration::ZERO
}

fn random_duration(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let nanos = rand::thread_rng().gen_range(min.as_nanos() as u64..max.as_nanos() as u64);
    Duration::from_nanos(nanos)
}

// 数据行按data.前缀入表，嵌套对象摊平成点分key
pub fn set_data_variables(store: &VariableStore, row: &DataRow) {
    for (key, value) in row {
        set_data_variable(store, &format!("data.{}", key), value);
    }
}

fn set_data_variable(store: &VariableStore, key: &str, value: &Value) {
    store.set(key, value.clone());
    if let Value::Object(nested) = value {
        for (k, v) in nested {
            set_data_variable(store, &format!("{}.{}", key, k), v);
        }
    }
}

// text模式下verbose日志的终端输出
fn print_debug_log(log: &DebugLog) {
    if log.kind == "request" {
        println!("\n=== 请求详情 ===");
        println!("请求ID: {}", log.request_id);
        println!("时间: {}", log.timestamp);
        println!("用例: {}", log.test_name);
        println!("方法: {}", log.method);
        println!("URL: {}", log.url);
        if !log.headers.is_empty() {
            println!("请求头:");
            for (key, value) in &log.headers {
                println!("  {}: {}", key, value);
            }
        }
        if !log.body.is_empty() {
            println!("请求体: {}", log.body);
        }
        println!("================");
    } else {
        println!("\n=== 响应详情 ===");
        println!("请求ID: {}", log.request_id);
        println!("时间: {}", log.timestamp);
        println!("用例: {}", log.test_name);
        println!("状态码: {}", log.status_code);
        if !log.headers.is_empty() {
            println!("响应头:");
            for (key, value) in &log.headers {
                println!("  {}: {}", key, value);
            }
        }
        if !log.body.is_empty() {
            if log.body.chars().count() > 1000 {
                let head: String = log.body.chars().take(1000).collect();
                println!("响应体({}字节): {}... (截断)", log.body.len(), head);
            } else {
                println!("响应体: {}", log.body);
            }
        }
        println!("耗时: {}ms", log.response_time_ms);
        println!("================");
    }
}
