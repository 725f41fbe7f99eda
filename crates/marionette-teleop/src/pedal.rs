//! 脚踏板输入状态机
//!
//! 把帧率采样的瞬时布尔开关量变成离散事件：按下、松开、双击、
//! 空闲超时。每个物理转换只产生一次事件，事后不会修正。
//!
//! 双击窗口与空闲超时窗口使用调用方传入的同一单调时钟；同一 tick 内
//! 同时满足"结束空闲超时"与"开始双击窗口"的按下，先判空闲超时失效，
//! 再计入双击。

use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// 踏板事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedalEvent {
    /// 上升沿：踏板按下
    Pressed,
    /// 下降沿：踏板松开
    Released,
    /// 双击：两次按下间隔小于双击窗口
    DoublePressed,
    /// 空闲超时：距最后一次踏板活动超过超时窗口
    IdleTimeout,
}

/// 踏板输入源
///
/// 每 tick 被采样一次，返回瞬时开关量。
pub trait PedalSource: Send {
    fn is_pressed(&mut self) -> bool;
}

/// 踏板时序参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PedalConfig {
    /// 双击窗口（两次按下的最大间隔）
    pub double_press_window: Duration,
    /// 空闲超时（无踏板活动的最大时长）
    pub idle_timeout: Duration,
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            double_press_window: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// 踏板状态机
///
/// `sample` 每 tick 调用一次；返回该 tick 产生的事件，
/// 顺序即语义顺序（空闲超时先于按下/双击）。
pub struct PedalMonitor {
    config: PedalConfig,
    last_sample: bool,
    /// 最近一次上升沿时刻（双击窗口起点）
    last_press_at: Option<Instant>,
    /// 最近一次踏板活动时刻（任何按住的 tick 都会刷新）
    last_activity_at: Option<Instant>,
    /// 空闲超时是否待触发（每个空闲期只触发一次）
    idle_armed: bool,
}

impl PedalMonitor {
    pub fn new(config: PedalConfig) -> Self {
        Self {
            config,
            last_sample: false,
            last_press_at: None,
            last_activity_at: None,
            idle_armed: false,
        }
    }

    /// 视作一次活动：刷新空闲时钟而不产生事件
    ///
    /// 标定这类长阻塞操作完成后调用，避免操作中流逝的时间
    /// 立即触发空闲超时。
    pub fn touch(&mut self, now: Instant) {
        self.last_activity_at = Some(now);
    }

    /// 按当前 tick 的瞬时采样推进状态机
    pub fn sample(&mut self, pressed: bool, now: Instant) -> SmallVec<[PedalEvent; 3]> {
        let mut events = SmallVec::new();

        // === 先判空闲超时（决胜规则：先于双击计数） ===
        if self.idle_armed
            && let Some(last_activity) = self.last_activity_at
            && now.duration_since(last_activity) > self.config.idle_timeout
        {
            events.push(PedalEvent::IdleTimeout);
            self.idle_armed = false;
            self.last_press_at = None;
        }

        if pressed {
            self.last_activity_at = Some(now);
            self.idle_armed = true;
        }

        // === 边沿检测 ===
        if pressed && !self.last_sample {
            events.push(PedalEvent::Pressed);

            let within_window = matches!(
                self.last_press_at,
                Some(prev) if now.duration_since(prev) < self.config.double_press_window
            );
            if within_window {
                events.push(PedalEvent::DoublePressed);
                // 双击消费本轮窗口；第三次按下重新开始计数
                self.last_press_at = None;
            } else {
                self.last_press_at = Some(now);
            }
        } else if !pressed && self.last_sample {
            events.push(PedalEvent::Released);
        }

        self.last_sample = pressed;
        events
    }
}

/// 脚本化踏板（测试与回放用）：按 tick 顺序回放预置采样
pub struct ScriptedPedal {
    samples: std::collections::VecDeque<bool>,
}

impl ScriptedPedal {
    pub fn new(samples: impl IntoIterator<Item = bool>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
        }
    }
}

impl PedalSource for ScriptedPedal {
    fn is_pressed(&mut self) -> bool {
        self.samples.pop_front().unwrap_or(false)
    }
}
