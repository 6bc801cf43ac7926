use std::fmt;
use tracing::warn;

use super::PlanError;

/// Physical bounds of a known quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalLimits {
    pub min: f64,
    pub max: f64,
    pub unit: &'static str,
    pub description: &'static str,
}

static LIMITS: [(&str, PhysicalLimits); 8] = [
    ("pres_ref", PhysicalLimits { min: 1.0, max: 100.0, unit: "MPa", description: "Reference pressure" }),
    ("temp_ref", PhysicalLimits { min: 0.0, max: 200.0, unit: "°C", description: "Reference temperature" }),
    ("cp_rock", PhysicalLimits { min: 1e-6, max: 1e-3, unit: "1/bar", description: "Rock compressibility" }),
    ("srw", PhysicalLimits { min: 0.0, max: 0.3, unit: "fraction", description: "Residual water saturation" }),
    ("src", PhysicalLimits { min: 0.0, max: 0.3, unit: "fraction", description: "Residual CO2 saturation" }),
    ("pe", PhysicalLimits { min: 0.1, max: 10.0, unit: "kPa", description: "Entry pressure" }),
    ("xnacl", PhysicalLimits { min: 0.0, max: 0.2, unit: "fraction", description: "NaCl mass fraction" }),
    ("rho_h2o", PhysicalLimits { min: 900.0, max: 1200.0, unit: "kg/m³", description: "Water density" }),
];

pub fn physical_limits(name: &str) -> Option<&'static PhysicalLimits> {
    LIMITS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, l)| l)
}

/// Every field with known physical limits, in table order.
pub fn limited_fields() -> impl Iterator<Item = (&'static str, &'static PhysicalLimits)> {
    LIMITS.iter().map(|(n, l)| (*n, l))
}

/// One physical quantity and the range it may be swept over.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    base_value: f64,
    variation_delta: f64,
    min_value: f64,
    max_value: f64,
    limits: Option<&'static PhysicalLimits>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, base_value: f64, variation_delta: f64) -> Result<Self, PlanError> {
        let name = name.into();
        if !(0.0..=1.0).contains(&variation_delta) {
            return Err(PlanError::InvalidDelta { delta: variation_delta });
        }
        if !base_value.is_finite() {
            return Err(PlanError::NonNumericField {
                section: None,
                field: name,
            });
        }

        let limits = physical_limits(&name);
        if let Some(l) = limits {
            if !(l.min..=l.max).contains(&base_value) {
                return Err(PlanError::OutOfPhysicalLimits {
                    name,
                    value: base_value,
                    min: l.min,
                    max: l.max,
                });
            }
        } else {
            warn!(parameter = %name, "no physical limits defined; range is unbounded");
        }

        let a = base_value * (1.0 - variation_delta);
        let b = base_value * (1.0 + variation_delta);
        let (mut lo, mut hi) = if a <= b { (a, b) } else { (b, a) };
        if let Some(l) = limits {
            lo = lo.max(l.min);
            hi = hi.min(l.max);
        }
        if lo > hi {
            return Err(PlanError::EmptyRange { name });
        }

        Ok(Self {
            name,
            base_value,
            variation_delta,
            min_value: lo,
            max_value: hi,
            limits,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    pub fn variation_delta(&self) -> f64 {
        self.variation_delta
    }

    pub fn limits(&self) -> (f64, f64) {
        (self.min_value, self.max_value)
    }

    pub fn unit(&self) -> &'static str {
        self.limits.map(|l| l.unit).unwrap_or("unitless")
    }

    pub fn is_valid(&self, value: f64) -> bool {
        (self.min_value..=self.max_value).contains(&value)
    }

    /// `points` evenly spaced values covering the derived range, endpoints included.
    pub fn sample(&self, points: usize) -> Vec<f64> {
        match points {
            0 => Vec::new(),
            1 => vec![self.min_value],
            n => {
                let step = (self.max_value - self.min_value) / (n - 1) as f64;
                (0..n)
                    .map(|i| {
                        if i == n - 1 {
                            self.max_value
                        } else {
                            self.min_value + step * i as f64
                        }
                    })
                    .collect()
            }
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit();
        match self.limits {
            Some(l) => write!(
                f,
                "{}: {} {} ({})\nRange: [{}, {}] {}",
                self.name, self.base_value, unit, l.description, self.min_value, self.max_value, unit
            ),
            None => write!(
                f,
                "{}: {}\nRange: [{}, {}]",
                self.name, self.base_value, self.min_value, self.max_value
            ),
        }
    }
}
