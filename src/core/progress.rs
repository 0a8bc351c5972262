use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

// 终端进度条，每收到一条结果走一格
// duration模式的total只是估算，超了也不报错
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total.max(1));
        bar.set_style(
            ProgressStyle::with_template(
                "[{bar:50}] {pos}/{len} ({percent}%) | {per_sec} | 已用: {elapsed} | 预计: {eta}",
            )
            .unwrap()
            .progress_chars("█░ "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Progress { bar }
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
