//! 终端状态显示
//!
//! 把会话状态事件渲染成操作员可读的一行提示。

use marionette_teleop::{SessionStatus, StatusSink};

/// 打印到标准输出的状态汇
pub struct TerminalStatusSink;

impl StatusSink for TerminalStatusSink {
    fn status_changed(&mut self, status: SessionStatus) {
        let line = match status {
            SessionStatus::ReadyForCalibration => {
                "Status: ready for calibration (double press the pedal)"
            },
            SessionStatus::TeleopActive => "Status: teleoperation active",
            SessionStatus::Ready => "Status: ready (press and hold the pedal)",
        };
        println!("{}", line);
    }
}
