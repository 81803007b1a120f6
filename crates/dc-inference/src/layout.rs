//! Flat parameter layout for the hierarchical demand model.
//!
//! Parameters: `[mu_level, mu_trend, mu_weekly, mu_monthly,
//! tau_level, tau_trend, tau_weekly, tau_monthly, noise_scale,
//! z_level[c0], z_trend[c0], z_weekly[c0], z_monthly[c0], z_level[c1], ...]`
//!
//! Derived: `<component>[c] = mu_<component> + tau_<component> * z_<component>[c]`

use dc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of additive demand components.
pub const N_COMPONENTS: usize = 4;

/// One additive component of the expected-demand predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Demand level at the window midpoint.
    Level,
    /// Linear trend per day.
    Trend,
    /// Weekly seasonal amplitude.
    Weekly,
    /// Monthly seasonal amplitude.
    Monthly,
}

impl Component {
    /// All components in layout order.
    pub const ALL: [Component; N_COMPONENTS] =
        [Component::Level, Component::Trend, Component::Weekly, Component::Monthly];

    /// Position within a component block.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Component::Level => 0,
            Component::Trend => 1,
            Component::Weekly => 2,
            Component::Monthly => 3,
        }
    }

    /// Lower-case name used in parameter names.
    pub fn name(self) -> &'static str {
        match self {
            Component::Level => "level",
            Component::Trend => "trend",
            Component::Weekly => "weekly",
            Component::Monthly => "monthly",
        }
    }

    /// Parse a component name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Per-category component values on the predictor scale.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentValues {
    /// Demand level at the window midpoint.
    pub level: f64,
    /// Trend per day.
    pub trend: f64,
    /// Weekly amplitude.
    pub weekly: f64,
    /// Monthly amplitude.
    pub monthly: f64,
}

impl ComponentValues {
    /// Values as an array in component order.
    #[inline]
    pub fn to_array(self) -> [f64; N_COMPONENTS] {
        [self.level, self.trend, self.weekly, self.monthly]
    }

    /// Build from an array in component order.
    #[inline]
    pub fn from_array(v: [f64; N_COMPONENTS]) -> Self {
        Self { level: v[0], trend: v[1], weekly: v[2], monthly: v[3] }
    }
}

/// A named quantity that can be read off a parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterRef {
    /// A raw entry of the flat vector.
    Raw(usize),
    /// A derived per-category component value `mu + tau * z`.
    Derived {
        /// Category index.
        category: usize,
        /// Component.
        component: Component,
    },
}

/// Offset map `(category, component) -> index` over the flat parameter vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    categories: Vec<String>,
}

impl ParameterLayout {
    /// Index of the global noise scale.
    pub const NOISE_SCALE: usize = 2 * N_COMPONENTS;

    const Z_OFFSET: usize = 2 * N_COMPONENTS + 1;

    /// Create a layout for the given category names.
    pub fn new(categories: Vec<String>) -> Result<Self> {
        if categories.is_empty() {
            return Err(Error::Validation("parameter layout needs at least one category".into()));
        }
        Ok(Self { categories })
    }

    /// Category names in index order.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Number of categories.
    pub fn n_categories(&self) -> usize {
        self.categories.len()
    }

    /// Length of the flat parameter vector.
    pub fn dim(&self) -> usize {
        Self::Z_OFFSET + N_COMPONENTS * self.categories.len()
    }

    /// Index of the global mean for a component.
    #[inline]
    pub fn mu(component: Component) -> usize {
        component.index()
    }

    /// Index of the between-category spread for a component.
    #[inline]
    pub fn tau(component: Component) -> usize {
        N_COMPONENTS + component.index()
    }

    /// Index of the standardized deviation for `(category, component)`.
    #[inline]
    pub fn z(&self, category: usize, component: Component) -> usize {
        debug_assert!(category < self.categories.len());
        Self::Z_OFFSET + N_COMPONENTS * category + component.index()
    }

    /// Parameter names in layout order.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.dim());
        for c in Component::ALL {
            names.push(format!("mu_{}", c.name()));
        }
        for c in Component::ALL {
            names.push(format!("tau_{}", c.name()));
        }
        names.push("noise_scale".to_string());
        for cat in &self.categories {
            for c in Component::ALL {
                names.push(format!("z_{}[{}]", c.name(), cat));
            }
        }
        names
    }

    /// Bounds per parameter: scales are `(0, inf)`, everything else unbounded.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        (0..self.dim())
            .map(|i| {
                if (N_COMPONENTS..=Self::NOISE_SCALE).contains(&i) {
                    (0.0, f64::INFINITY)
                } else {
                    (f64::NEG_INFINITY, f64::INFINITY)
                }
            })
            .collect()
    }

    /// Index of a category by name.
    pub fn category_index(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == name)
    }

    /// Resolve a per-category quantity by category name and a bare parameter
    /// name: `level` means the derived value, `z_level` the standardized deviation.
    pub fn category_parameter(&self, category: &str, parameter: &str) -> Result<ParameterRef> {
        let idx = self
            .category_index(category)
            .ok_or_else(|| Error::Validation(format!("unknown category '{}'", category)))?;
        if let Some(component) = Component::from_name(parameter) {
            return Ok(ParameterRef::Derived { category: idx, component });
        }
        if let Some(component) = parameter.strip_prefix("z_").and_then(Component::from_name) {
            return Ok(ParameterRef::Raw(self.z(idx, component)));
        }
        Err(Error::Validation(format!(
            "'{}' is not a per-category parameter (expected level, trend, weekly, monthly or z_<component>)",
            parameter
        )))
    }

    /// Read a quantity from a constrained parameter vector.
    #[inline]
    pub fn extract(&self, params: &[f64], r: ParameterRef) -> f64 {
        match r {
            ParameterRef::Raw(i) => params[i],
            ParameterRef::Derived { category, component } => {
                self.component_value(params, category, component)
            }
        }
    }

    /// Derived component value `mu + tau * z` for one category.
    #[inline]
    pub fn component_value(&self, params: &[f64], category: usize, component: Component) -> f64 {
        params[Self::mu(component)]
            + params[Self::tau(component)] * params[self.z(category, component)]
    }

    /// All derived component values for one category.
    pub fn category_values(&self, params: &[f64], category: usize) -> ComponentValues {
        ComponentValues::from_array(
            Component::ALL.map(|c| self.component_value(params, category, c)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ParameterLayout {
        ParameterLayout::new(vec!["bread".into(), "milk".into()]).unwrap()
    }

    #[test]
    fn test_layout_names_and_offsets() {
        let l = layout();
        assert_eq!(l.dim(), 17);
        let names = l.names();
        assert_eq!(names.len(), l.dim());
        assert_eq!(names[0], "mu_level");
        assert_eq!(names[ParameterLayout::tau(Component::Monthly)], "tau_monthly");
        assert_eq!(names[ParameterLayout::NOISE_SCALE], "noise_scale");
        assert_eq!(names[l.z(1, Component::Trend)], "z_trend[milk]");
    }

    #[test]
    fn test_bounds_mark_scales_positive() {
        let l = layout();
        let b = l.bounds();
        for c in Component::ALL {
            assert_eq!(b[ParameterLayout::mu(c)].0, f64::NEG_INFINITY);
            assert_eq!(b[ParameterLayout::tau(c)].0, 0.0);
        }
        assert_eq!(b[ParameterLayout::NOISE_SCALE].0, 0.0);
        assert_eq!(b[l.z(0, Component::Level)].0, f64::NEG_INFINITY);
    }

    #[test]
    fn test_derived_value() {
        let l = layout();
        let mut p = vec![0.0; l.dim()];
        p[ParameterLayout::mu(Component::Level)] = 100.0;
        p[ParameterLayout::tau(Component::Level)] = 10.0;
        p[l.z(1, Component::Level)] = -0.5;
        let r = l.category_parameter("milk", "level").unwrap();
        assert_eq!(l.extract(&p, r), 95.0);
        assert_eq!(l.category_values(&p, 0).level, 100.0);
        let z = l.category_parameter("milk", "z_level").unwrap();
        assert_eq!(l.extract(&p, z), -0.5);
        assert!(l.category_parameter("milk", "noise_scale").is_err());
    }
}
