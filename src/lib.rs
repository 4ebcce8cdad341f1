#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod capture; // 视频输入系统
pub mod config; // 运行配置
pub mod driver; // 主循环
pub mod emotion; // 情绪采样
pub mod error; // 组件错误类型
pub mod feedback; // 反馈文本组合
pub mod gesture; // 手势分类
pub mod logging; // 日志初始化
pub mod perception; // 感知适配层
pub mod posture; // 姿态评估
pub mod renderer; // 叠加层与输出
pub mod speech; // 语音播报

#[cfg(feature = "onnx")]
pub mod models; // ONNX 模型后端

pub use crate::config::AppConfig;
pub use crate::driver::{Driver, DriverState, SessionReport};

use crossbeam_channel::Sender;

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

/// 工作线程退出时 (包括 panic 展开) 发出信号
pub(crate) struct ExitSignal(pub(crate) Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}
