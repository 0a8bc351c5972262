use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "配置驱动的HTTP压测与契约测试引擎", long_about = None, disable_version_flag = true)]
pub struct Args {
    /// 配置文件路径(json)
    #[arg(short, long)]
    pub config: Option<String>,

    /// 并发worker数量
    #[arg(short, long, default_value_t = 10)]
    pub workers: usize,

    /// 报告格式: text / json / html
    #[arg(short, long, default_value = "text")]
    pub output: String,

    /// 打印请求与响应详情
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// 只校验配置，打印是否合法和用例数量后退出
    #[arg(short = 't', long = "test-only", default_value_t = false)]
    pub test_only: bool,

    /// 打印版本信息后退出
    #[arg(long, default_value_t = false)]
    pub version: bool,
}
