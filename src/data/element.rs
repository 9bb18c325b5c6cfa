//! Element emission-line models.
//!
//! Reference line energies come from a static table of K-series lines for
//! the light and transition elements and L-series lines for the heavy
//! elements. Default branching ratios can be overridden per line with
//! custom multipliers.

use super::params::{STR_COHERENT_SCT_AMPLITUDE, STR_COMPTON_AMPLITUDE};

/// Line family an element is fitted with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineFamily {
    /// K-series fluorescence lines.
    K,
    /// L-series fluorescence lines.
    L,
    /// Coherent (elastic) scatter pseudo-element.
    Elastic,
    /// Incoherent (Compton) scatter pseudo-element.
    Compton,
}

/// One reference emission line: energy and relative intensity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmissionLine {
    /// Line energy in keV.
    pub energy_kev: f64,
    /// Intensity relative to the strongest line of the family.
    pub ratio: f64,
}

/// (Kα1, Kα2, Kβ1) energies in keV.
static K_LINES: &[(&str, [f64; 3])] = &[
    ("Na", [1.0410, 1.0410, 1.0711]),
    ("Mg", [1.2536, 1.2536, 1.3022]),
    ("Al", [1.4867, 1.4863, 1.5575]),
    ("Si", [1.7400, 1.7394, 1.8359]),
    ("P", [2.0137, 2.0127, 2.1391]),
    ("S", [2.3078, 2.3066, 2.4640]),
    ("Cl", [2.6224, 2.6208, 2.8156]),
    ("Ar", [2.9577, 2.9556, 3.1905]),
    ("K", [3.3138, 3.3111, 3.5896]),
    ("Ca", [3.6917, 3.6881, 4.0127]),
    ("Sc", [4.0906, 4.0861, 4.4605]),
    ("Ti", [4.5108, 4.5049, 4.9318]),
    ("V", [4.9522, 4.9446, 5.4273]),
    ("Cr", [5.4147, 5.4055, 5.9467]),
    ("Mn", [5.8988, 5.8877, 6.4905]),
    ("Fe", [6.4038, 6.3908, 7.0580]),
    ("Co", [6.9303, 6.9153, 7.6494]),
    ("Ni", [7.4782, 7.4609, 8.2647]),
    ("Cu", [8.0478, 8.0278, 8.9053]),
    ("Zn", [8.6389, 8.6158, 9.5720]),
    ("Ga", [9.2517, 9.2248, 10.2642]),
    ("Ge", [9.8864, 9.8553, 10.9821]),
    ("As", [10.5437, 10.5080, 11.7262]),
    ("Se", [11.2224, 11.1814, 12.4959]),
    ("Br", [11.9242, 11.8776, 13.2914]),
    ("Rb", [13.3953, 13.3358, 14.9613]),
    ("Sr", [14.1650, 14.0979, 15.8357]),
    ("Y", [14.9584, 14.8829, 16.7378]),
    ("Zr", [15.7751, 15.6909, 17.6678]),
];

/// Default K-family branching ratios (Kα1, Kα2, Kβ1).
const K_RATIOS: [f64; 3] = [1.0, 0.51, 0.17];

/// (Lα1, Lβ1, Lβ2, Lγ1) energies in keV.
static L_LINES: &[(&str, [f64; 4])] = &[
    ("W", [8.3976, 9.6724, 9.9615, 11.2859]),
    ("Pt", [9.4423, 11.0707, 11.2505, 12.9420]),
    ("Au", [9.7133, 11.4423, 11.5847, 13.3817]),
    ("Hg", [9.9888, 11.8226, 11.9241, 13.8301]),
    ("Pb", [10.5515, 12.6137, 12.6226, 14.7644]),
];

/// Default L-family branching ratios (Lα1, Lβ1, Lβ2, Lγ1).
const L_RATIOS: [f64; 4] = [1.0, 0.70, 0.21, 0.08];

/// Per-element physical line data used to synthesize its spectral shape.
#[derive(Clone, Debug)]
pub struct FitElement {
    symbol: String,
    family: LineFamily,
    lines: Vec<EmissionLine>,
    custom_ratios: Vec<f64>,
}

impl FitElement {
    /// Look up an element by symbol.
    ///
    /// A bare symbol selects the K family; an `_L` suffix selects the L
    /// family (e.g. `"Pb_L"`). Returns `None` for symbols not in the line
    /// table; callers log and skip those.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let (base, family) = match symbol.rsplit_once('_') {
            Some((base, "L")) => (base, LineFamily::L),
            Some((base, "K")) => (base, LineFamily::K),
            Some(_) => return None,
            None => (symbol, LineFamily::K),
        };

        let lines: Vec<EmissionLine> = match family {
            LineFamily::K => {
                let (_, energies) = K_LINES.iter().find(|(sym, _)| *sym == base)?;
                energies
                    .iter()
                    .zip(K_RATIOS.iter())
                    .map(|(&energy_kev, &ratio)| EmissionLine { energy_kev, ratio })
                    .collect()
            }
            LineFamily::L => {
                let (_, energies) = L_LINES.iter().find(|(sym, _)| *sym == base)?;
                energies
                    .iter()
                    .zip(L_RATIOS.iter())
                    .map(|(&energy_kev, &ratio)| EmissionLine { energy_kev, ratio })
                    .collect()
            }
            _ => unreachable!(),
        };

        let n = lines.len();
        Some(Self {
            symbol: symbol.to_string(),
            family,
            lines,
            custom_ratios: vec![1.0; n],
        })
    }

    /// Coherent-scatter pseudo-element.
    pub fn scatter_elastic() -> Self {
        Self {
            symbol: STR_COHERENT_SCT_AMPLITUDE.to_string(),
            family: LineFamily::Elastic,
            lines: Vec::new(),
            custom_ratios: Vec::new(),
        }
    }

    /// Compton-scatter pseudo-element.
    pub fn scatter_compton() -> Self {
        Self {
            symbol: STR_COMPTON_AMPLITUDE.to_string(),
            family: LineFamily::Compton,
            lines: Vec::new(),
            custom_ratios: Vec::new(),
        }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn family(&self) -> LineFamily {
        self.family
    }

    /// Name of this element's amplitude parameter in a `FitParams` set.
    pub fn amplitude_name(&self) -> &str {
        match self.family {
            LineFamily::Elastic => STR_COHERENT_SCT_AMPLITUDE,
            LineFamily::Compton => STR_COMPTON_AMPLITUDE,
            _ => &self.symbol,
        }
    }

    /// Number of lines in the family.
    #[inline]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Emission lines with custom branching-ratio multipliers applied.
    pub fn lines(&self) -> impl Iterator<Item = EmissionLine> + '_ {
        self.lines
            .iter()
            .zip(self.custom_ratios.iter())
            .map(|(line, &factor)| EmissionLine {
                energy_kev: line.energy_kev,
                ratio: line.ratio * factor,
            })
    }

    /// Override the branching-ratio multiplier of line `index` (0..N-1).
    /// Returns false if the index is out of range for the family.
    pub fn set_custom_ratio(&mut self, index: usize, factor: f64) -> bool {
        if let Some(slot) = self.custom_ratios.get_mut(index) {
            *slot = factor;
            true
        } else {
            false
        }
    }
}
