//! 键盘踏板适配
//!
//! USB 脚踏板通常枚举为键盘；调试时也可直接用键盘代替。
//! 终端置于 raw mode 后，读取线程把踏板键的每次到达时刻发给
//! [`KeyboardPedal`]；按键自动重复会持续刷新保持窗口，
//! 因此"踩住"表现为事件流不断、"松开"表现为窗口超时。

use crossbeam_channel::{Receiver, Sender, unbounded};
use marionette_teleop::PedalSource;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 按键保持窗口
///
/// 终端自动重复间隔通常在 30-500ms；窗口取 250ms 时
/// 双击（两次轻踩间隔 0.25-0.5s）与按住都能正确分辨。
const HOLD_WINDOW: Duration = Duration::from_millis(250);

/// raw mode 守卫：构造时关闭行缓冲与回显，丢弃时恢复原有终端设置
#[cfg(unix)]
struct RawTerminal {
    original: libc::termios,
}

#[cfg(unix)]
impl RawTerminal {
    fn enter() -> std::io::Result<Self> {
        // SAFETY: termios 为平凡可零初始化的 C 结构体，
        // fd 0 在进程存续期间始终有效
        unsafe {
            let mut termios = std::mem::zeroed::<libc::termios>();
            if libc::tcgetattr(0, &mut termios) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let original = termios;

            // 关闭行缓冲与回显；保留 ISIG，Ctrl-C 仍产生 SIGINT
            termios.c_lflag &= !(libc::ICANON | libc::ECHO);
            // 100ms 读超时，读取线程据此轮询关停标志
            termios.c_cc[libc::VMIN] = 0;
            termios.c_cc[libc::VTIME] = 1;
            if libc::tcsetattr(0, libc::TCSANOW, &termios) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(Self { original })
        }
    }
}

#[cfg(unix)]
impl Drop for RawTerminal {
    fn drop(&mut self) {
        // SAFETY: original 是 tcgetattr 返回的合法终端设置
        unsafe {
            libc::tcsetattr(0, libc::TCSANOW, &self.original);
        }
    }
}

/// 键盘踏板
///
/// `is_pressed` 非阻塞：清空事件通道后按保持窗口判定开关量。
pub struct KeyboardPedal {
    events: Receiver<Instant>,
    last_event: Option<Instant>,
}

impl KeyboardPedal {
    /// 启动读取线程并返回踏板源
    ///
    /// `trigger_key` 是作为踏板使用的键（默认空格）。
    /// 线程在关停标志置位后自行退出并恢复终端设置。
    #[cfg(unix)]
    pub fn spawn(trigger_key: u8, shutdown: Arc<AtomicBool>) -> std::io::Result<Self> {
        let raw = RawTerminal::enter()?;
        let (tx, rx) = unbounded();

        std::thread::Builder::new()
            .name("pedal-reader".to_string())
            .spawn(move || {
                // raw 守卫随线程存活；线程退出时恢复终端
                let _raw = raw;
                read_loop(trigger_key, tx, shutdown);
            })?;

        Ok(Self {
            events: rx,
            last_event: None,
        })
    }
}

/// 读取线程主循环：逐字节读 stdin，命中踏板键就发送时间戳
#[cfg(unix)]
fn read_loop(trigger_key: u8, tx: Sender<Instant>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("Pedal reader exiting");
            return;
        }

        let mut byte = 0u8;
        // SAFETY: 向合法的单字节缓冲区读取；VTIME 保证调用有界阻塞
        let n = unsafe { libc::read(0, (&mut byte as *mut u8).cast(), 1) };
        match n {
            1 if byte == trigger_key => {
                if tx.send(Instant::now()).is_err() {
                    return;
                }
            },
            1 => {
                debug!("Ignoring key 0x{:02X}", byte);
            },
            0 => {}, // 读超时，回到循环头检查关停标志
            _ => {
                warn!("stdin read error: {}", std::io::Error::last_os_error());
                return;
            },
        }
    }
}

impl PedalSource for KeyboardPedal {
    fn is_pressed(&mut self) -> bool {
        while let Ok(at) = self.events.try_recv() {
            self.last_event = Some(at);
        }
        matches!(self.last_event, Some(at) if at.elapsed() < HOLD_WINDOW)
    }
}
