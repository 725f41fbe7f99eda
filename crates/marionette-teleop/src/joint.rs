//! 关节向量
//!
//! 定长实数序列：机械臂关节为弧度，末位（若有）为归一化夹爪开合。
//! 每个控制周期从硬件采样创建，读取后不再修改。

use smallvec::SmallVec;

/// 关节向量
///
/// 固定长度（同一臂型配置下恒定：无夹爪 6，带夹爪 7）。
/// 栈上内联存储，控制热路径无堆分配。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointVector(SmallVec<[f64; 8]>);

impl JointVector {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_slice(values: &[f64]) -> Self {
        Self(SmallVec::from_slice(values))
    }

    /// 全零向量
    pub fn zeros(len: usize) -> Self {
        Self(smallvec::smallvec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn push(&mut self, value: f64) {
        self.0.push(value);
    }

    /// 逐元素差：`self - other`
    ///
    /// 调用方保证长度一致（见 [`SyncEngine`](crate::sync::SyncEngine) 的前置检查）。
    pub fn delta(&self, other: &JointVector) -> JointVector {
        debug_assert_eq!(self.len(), other.len());
        Self(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| a - b)
                .collect(),
        )
    }

    /// 逐元素和
    pub fn add(&self, other: &JointVector) -> JointVector {
        debug_assert_eq!(self.len(), other.len());
        Self(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| a + b)
                .collect(),
        )
    }

    /// 最大绝对分量及其下标
    pub fn max_abs(&self) -> (usize, f64) {
        let mut max_idx = 0;
        let mut max_val = 0.0;
        for (i, v) in self.0.iter().enumerate() {
            if v.abs() > max_val {
                max_val = v.abs();
                max_idx = i;
            }
        }
        (max_idx, max_val)
    }

    /// 按最大分量等比缩放，保持方向
    ///
    /// 若最大绝对分量超过 `max_step`，整个向量按 `max_step / max` 缩放；
    /// 否则原样返回。
    pub fn clamped_step(&self, max_step: f64) -> JointVector {
        let (_, max_val) = self.max_abs();
        if max_val <= max_step {
            return self.clone();
        }
        let scale = max_step / max_val;
        Self(self.0.iter().map(|v| v * scale).collect())
    }
}

impl std::ops::Index<usize> for JointVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl From<Vec<f64>> for JointVector {
    fn from(values: Vec<f64>) -> Self {
        Self(SmallVec::from_vec(values))
    }
}

impl std::fmt::Display for JointVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", v)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_elementwise() {
        let a = JointVector::from_slice(&[1.0, 2.0, 3.0]);
        let b = JointVector::from_slice(&[0.5, 2.5, 3.0]);
        assert_eq!(a.delta(&b).as_slice(), &[0.5, -0.5, 0.0]);
    }

    #[test]
    fn test_max_abs_tracks_negative_components() {
        let v = JointVector::from_slice(&[0.1, -0.9, 0.3]);
        assert_eq!(v.max_abs(), (1, 0.9));
    }

    #[test]
    fn test_clamped_step_preserves_direction_ratios() {
        // 最大分量 0.2，max_step 0.05 → 等比缩放 4 倍
        let delta = JointVector::from_slice(&[0.2, -0.1, 0.05, 0.0]);
        let step = delta.clamped_step(0.05);

        let (_, max_val) = step.max_abs();
        assert!((max_val - 0.05).abs() < 1e-12);
        assert!((step[0] - 0.05).abs() < 1e-12);
        assert!((step[1] - (-0.025)).abs() < 1e-12);
        assert!((step[2] - 0.0125).abs() < 1e-12);
        assert_eq!(step[3], 0.0);
    }

    #[test]
    fn test_clamped_step_noop_within_limit() {
        let delta = JointVector::from_slice(&[0.01, -0.03]);
        assert_eq!(delta.clamped_step(0.05), delta);
    }
}
