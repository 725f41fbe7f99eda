//! # Marionette Teleop
//!
//! 主从遥操作核心：拖动臂（leader）流式输出关节目标，
//! 电动随动臂（follower）及其末端夹爪实时跟随。
//!
//! ## 模块
//!
//! - `joint`: 关节向量类型与逐元素运算
//! - `arm`: 机械臂能力接口（厂商适配器边界）与夹爪组合
//! - `pedal`: 脚踏板输入状态机（按下/松开/双击/空闲超时）
//! - `sync`: 位置同步引擎（接近门 + 有限轮次增量收敛）
//! - `session`: 会话状态机与固定节拍控制循环
//! - `config`: TOML 配置
//!
//! ## 并发模型
//!
//! 单一逻辑控制线程驱动 tick 循环，是会话状态的唯一写者。
//! 所有 IO 同步阻塞；取消是协作式的：关停标志在 tick 之间
//! 与接近门循环内部被检查。

pub mod arm;
pub mod config;
pub mod joint;
pub mod pedal;
pub mod session;
pub mod sync;

pub use arm::{ArmError, ArmInterface, GrippedArm, MockArm};
pub use config::{ConfigError, GripperVariant, TeleopConfig};
pub use joint::JointVector;
pub use pedal::{PedalConfig, PedalEvent, PedalMonitor, PedalSource, ScriptedPedal};
pub use session::{
    LoopConfig, NullStatusSink, SessionController, SessionError, SessionOutcome, SessionState,
    SessionStatus, StatusSink,
};
pub use sync::{GateStatus, SyncConfig, SyncEngine, SyncError};
