//! 无硬件会话演示
//!
//! 用仿真臂和脚本化踏板跑一小段完整会话：
//! 双击标定 → 踩住接合 → 松开脱开。
//!
//! # 运行
//!
//! ```bash
//! cargo run -p marionette-teleop --example mock_session
//! ```

use marionette_teleop::{
    JointVector, LoopConfig, MockArm, PedalConfig, ScriptedPedal, SessionController,
    SessionStatus, StatusSink, SyncConfig, SyncEngine,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

struct PrintSink;

impl StatusSink for PrintSink {
    fn status_changed(&mut self, status: SessionStatus) {
        println!(">>> {:?}", status);
    }
}

fn main() {
    tracing_subscriber::fmt().init();

    // 拖动臂保持在一个固定姿态（各槽位与零位随动臂的差都在接近门 0.8 之内）
    let mut leader_pose = JointVector::from_slice(&[0.3, -0.2, 0.4, 0.0, 0.1, -0.3]);
    leader_pose.push(0.7);
    let leader = MockArm::frozen(leader_pose);
    let follower = MockArm::responsive(JointVector::zeros(7));

    // 踏板脚本：双击，随后踩住十个 tick
    let mut script = vec![true, false, true];
    script.extend(std::iter::repeat(true).take(10));
    script.extend([false, false]);

    let mut session = SessionController::new(
        leader,
        follower,
        ScriptedPedal::new(script),
        PrintSink,
        PedalConfig::default(),
        SyncEngine::new(SyncConfig {
            step_period: Duration::from_millis(1),
            ..SyncConfig::default()
        }),
        LoopConfig {
            rate_hz: 100.0,
            max_ticks: Some(20),
            abort_on_sync_exhaustion: true,
        },
    );

    let outcome = session
        .run(Arc::new(AtomicBool::new(false)))
        .expect("mock session should not fail");
    println!("Session outcome: {:?}", outcome);
}
