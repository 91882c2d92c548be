use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub};

/// 2^256, exactly representable in an f64.
pub const SCALE_FACTOR: f64 =
    115792089237316195423570985008687907853269984665640564039457584007913129639936.0;
pub const SCALE_THRESHOLD: f64 = 1.0 / SCALE_FACTOR;

/// Scaler value encoding an exact zero.
pub const NULL_SCALER: i32 = i32::MAX / 2 - 1;

/// Nonnegative scalar `value * SCALE_THRESHOLD^scaler`, used to keep
/// likelihood-like products representable far below f64 underflow.
///
/// A null (exactly zero) value carries `NULL_SCALER`.
#[derive(Debug, Clone, Copy)]
pub struct ScaledValue {
    pub value: f64,
    pub scaler: i32,
}

impl Default for ScaledValue {
    fn default() -> Self {
        Self::null()
    }
}

impl ScaledValue {
    pub fn null() -> Self {
        Self {
            value: 0.0,
            scaler: NULL_SCALER,
        }
    }

    pub fn new(value: f64) -> Self {
        Self { value, scaler: 0 }
    }

    pub fn with_scaler(value: f64, scaler: i32) -> Self {
        Self { value, scaler }
    }

    pub fn is_null(&self) -> bool {
        self.value == 0.0
    }

    pub fn set_null(&mut self) {
        self.value = 0.0;
        self.scaler = NULL_SCALER;
    }

    pub fn check_null(&mut self) {
        if self.value == 0.0 {
            self.scaler = NULL_SCALER;
        }
    }

    /// One renormalisation step: values that dropped below the threshold
    /// move one scaler band down. A no-op on values already in range.
    pub fn scale(&mut self) {
        if self.value < SCALE_THRESHOLD {
            self.scaler += 1;
            self.value *= SCALE_FACTOR;
            self.check_null();
        }
    }

    /// Collapses to `0.0` for any non-zero scaler band, even though the
    /// magnitude may matter in log space. Compare across bands with `ln`.
    pub fn to_f64(&self) -> f64 {
        if self.scaler == 0 {
            self.value
        } else {
            0.0
        }
    }

    pub fn is_proba(&self) -> bool {
        *self <= ScaledValue::new(1.0) && ScaledValue::null() <= *self
    }

    pub fn ln(&self) -> f64 {
        if self.scaler == NULL_SCALER {
            return f64::NEG_INFINITY;
        }
        self.value.ln() + f64::from(self.scaler) * SCALE_THRESHOLD.ln()
    }
}

impl From<ScaledValue> for f64 {
    fn from(v: ScaledValue) -> f64 {
        v.to_f64()
    }
}

impl Add for ScaledValue {
    type Output = Self;

    // Saturation add: on mismatched scalers the operand in the larger
    // magnitude band wins entirely, the other is below the precision floor.
    fn add(self, v: Self) -> Self {
        if v.scaler == self.scaler {
            Self::with_scaler(self.value + v.value, self.scaler)
        } else if v.scaler < self.scaler {
            v
        } else {
            self
        }
    }
}

impl AddAssign for ScaledValue {
    fn add_assign(&mut self, v: Self) {
        if v.scaler == self.scaler {
            self.value += v.value;
        } else if v.scaler < self.scaler {
            self.value = v.value;
            self.scaler = v.scaler;
        }
    }
}

impl Sub for ScaledValue {
    type Output = Self;

    // Only defined when self dominates v; negative results are a contract
    // violation upstream, except for sub-tolerance cancellation noise.
    fn sub(self, v: Self) -> Self {
        if v.scaler == self.scaler {
            let diff = self.value - v.value;
            if diff < 0.0 {
                if diff.abs() < 1e-10 {
                    return Self::null();
                }
                panic!("negative subtraction: {} - {}", self, v);
            }
            let mut res = Self::with_scaler(diff, self.scaler);
            res.scale();
            res
        } else if v.scaler < self.scaler {
            panic!("negative subtraction: {} - {}", self, v);
        } else {
            self
        }
    }
}

impl Mul for ScaledValue {
    type Output = Self;

    fn mul(self, v: Self) -> Self {
        Self::with_scaler(self.value * v.value, self.scaler + v.scaler)
    }
}

impl MulAssign for ScaledValue {
    fn mul_assign(&mut self, v: Self) {
        self.value *= v.value;
        self.scaler += v.scaler;
    }
}

impl Mul<f64> for ScaledValue {
    type Output = Self;

    fn mul(self, v: f64) -> Self {
        Self::with_scaler(self.value * v, self.scaler)
    }
}

impl MulAssign<f64> for ScaledValue {
    fn mul_assign(&mut self, v: f64) {
        self.value *= v;
    }
}

impl Div<f64> for ScaledValue {
    type Output = Self;

    fn div(self, v: f64) -> Self {
        Self::with_scaler(self.value / v, self.scaler)
    }
}

impl DivAssign<f64> for ScaledValue {
    fn div_assign(&mut self, v: f64) {
        self.value /= v;
    }
}

impl PartialEq for ScaledValue {
    fn eq(&self, v: &Self) -> bool {
        self.scaler == v.scaler && (v.value - self.value).abs() <= f64::EPSILON
    }
}

// The comparison operators are overridden individually: the null sentinel
// compares asymmetrically (`null < null` is false yet `null <= null` is
// true), and downstream orderings rely on exactly these definitions.
impl PartialOrd for ScaledValue {
    fn partial_cmp(&self, v: &Self) -> Option<Ordering> {
        if self.lt(v) {
            Some(Ordering::Less)
        } else if self.gt(v) {
            Some(Ordering::Greater)
        } else {
            Some(Ordering::Equal)
        }
    }

    fn lt(&self, v: &Self) -> bool {
        if self.is_null() {
            return !v.is_null();
        }
        if self.scaler != v.scaler {
            // a larger scaler means a smaller magnitude
            return self.scaler > v.scaler;
        }
        self.value < v.value
    }

    fn le(&self, v: &Self) -> bool {
        if self.is_null() {
            return true;
        }
        if self.scaler != v.scaler {
            return self.scaler > v.scaler;
        }
        self.value <= v.value
    }

    fn gt(&self, v: &Self) -> bool {
        !self.le(v)
    }

    fn ge(&self, v: &Self) -> bool {
        !self.lt(v)
    }
}

impl Display for ScaledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.value, self.scaler)
    }
}
