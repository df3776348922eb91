//! Colombian tax arithmetic used by the `calculate_taxes` tool.
//!
//! All amounts are plain `f64` in the same currency unit as the base; nothing is
//! rounded. Callers that need cent-exact figures round on their side.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationKind {
    Iva,
    Retefuente,
    Reteiva,
    Reteica,
    Todas,
}

impl FromStr for CalculationKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "iva" => Ok(Self::Iva),
            "retefuente" => Ok(Self::Retefuente),
            "reteiva" => Ok(Self::Reteiva),
            "reteica" => Ok(Self::Reteica),
            "todas" => Ok(Self::Todas),
            _ => Err(ToolError::UnknownCalculationKind(s.to_string())),
        }
    }
}

/// Concepts that select the withholding-at-source rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionConcept {
    Compras,
    Servicios,
    Arrendamientos,
    Transporte,
}

impl RetentionConcept {
    /// Unrecognized or missing concepts fall back to services.
    pub fn from_str_lenient(s: Option<&str>) -> Self {
        match s.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("compras") => Self::Compras,
            Some("arrendamientos") => Self::Arrendamientos,
            Some("transporte") => Self::Transporte,
            Some("servicios") => Self::Servicios,
            Some(other) => {
                tracing::debug!("Unknown retention concept '{}', using servicios", other);
                Self::Servicios
            }
            None => Self::Servicios,
        }
    }
}

impl fmt::Display for RetentionConcept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetentionConcept::Compras => "compras",
            RetentionConcept::Servicios => "servicios",
            RetentionConcept::Arrendamientos => "arrendamientos",
            RetentionConcept::Transporte => "transporte",
        };
        f.write_str(name)
    }
}

/// Fixed rate table. Percentages are stored as written in the tax code.
#[derive(Debug, Clone, Copy)]
pub struct TaxRates {
    pub iva_pct: f64,
    pub rete_iva_share: f64,
    pub rete_ica_pct: f64,
    pub compras_pct: f64,
    pub servicios_pct: f64,
    pub arrendamientos_pct: f64,
    pub transporte_pct: f64,
}

impl TaxRates {
    pub const COLOMBIA: TaxRates = TaxRates {
        iva_pct: 19.0,
        rete_iva_share: 0.50,
        rete_ica_pct: 0.5,
        compras_pct: 2.5,
        servicios_pct: 4.0,
        arrendamientos_pct: 3.5,
        transporte_pct: 1.0,
    };

    pub fn retention_pct(&self, concept: RetentionConcept) -> f64 {
        match concept {
            RetentionConcept::Compras => self.compras_pct,
            RetentionConcept::Servicios => self.servicios_pct,
            RetentionConcept::Arrendamientos => self.arrendamientos_pct,
            RetentionConcept::Transporte => self.transporte_pct,
        }
    }
}

impl Default for TaxRates {
    fn default() -> Self {
        Self::COLOMBIA
    }
}

/// Arguments of the `calculate_taxes` tool
#[derive(Debug, Clone, Deserialize)]
pub struct TaxCalculationRequest {
    pub base_amount: f64,
    pub calculation_type: String,
    #[serde(default)]
    pub retention_concept: Option<String>,
    #[serde(default)]
    pub is_iva_responsible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IvaResult {
    pub base: f64,
    pub iva: f64,
    pub total_con_iva: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetefuenteResult {
    pub base: f64,
    /// Percentage, e.g. `4.0` for 4%
    pub tarifa: f64,
    pub retencion: f64,
    pub concepto: RetentionConcept,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReteivaResult {
    pub base: f64,
    pub iva: f64,
    pub rete_iva: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReteicaResult {
    pub base: f64,
    pub rete_ica: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiscalBenefits {
    pub iva_descontable: f64,
    pub credito_renta: f64,
    pub credito_ica: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullDeductionResult {
    pub base: f64,
    pub iva: f64,
    pub total_con_iva: f64,
    pub concepto: RetentionConcept,
    pub rete_fuente: f64,
    pub rete_iva: f64,
    pub rete_ica: f64,
    pub total_retenciones: f64,
    pub neto_a_pagar: f64,
    pub beneficios_fiscales: FiscalBenefits,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaxResult {
    Iva(IvaResult),
    Retefuente(RetefuenteResult),
    Reteiva(ReteivaResult),
    Reteica(ReteicaResult),
    Todas(FullDeductionResult),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaxCalculator {
    rates: TaxRates,
}

impl TaxCalculator {
    pub fn new(rates: TaxRates) -> Self {
        Self { rates }
    }

    pub fn calculate(&self, req: &TaxCalculationRequest) -> Result<TaxResult, ToolError> {
        let kind: CalculationKind = req.calculation_type.parse()?;
        let base = req.base_amount;
        if !base.is_finite() || base < 0.0 {
            return Err(ToolError::InvalidArgument(format!(
                "base_amount must be a non-negative number, got {base}"
            )));
        }
        let concept = RetentionConcept::from_str_lenient(req.retention_concept.as_deref());

        Ok(match kind {
            CalculationKind::Iva => TaxResult::Iva(self.iva(base)),
            CalculationKind::Retefuente => TaxResult::Retefuente(self.retefuente(base, concept)),
            CalculationKind::Reteiva => TaxResult::Reteiva(self.reteiva(base)),
            CalculationKind::Reteica => TaxResult::Reteica(self.reteica(base)),
            CalculationKind::Todas => TaxResult::Todas(self.full_deduction(
                base,
                concept,
                req.is_iva_responsible.unwrap_or(true),
            )),
        })
    }

    pub fn iva(&self, base: f64) -> IvaResult {
        let iva = base * fraction(self.rates.iva_pct);
        IvaResult {
            base,
            iva,
            total_con_iva: base + iva,
        }
    }

    pub fn retefuente(&self, base: f64, concept: RetentionConcept) -> RetefuenteResult {
        let tarifa = self.rates.retention_pct(concept);
        RetefuenteResult {
            base,
            tarifa,
            retencion: base * fraction(tarifa),
            concepto: concept,
        }
    }

    pub fn reteiva(&self, base: f64) -> ReteivaResult {
        let iva = base * fraction(self.rates.iva_pct);
        ReteivaResult {
            base,
            iva,
            rete_iva: iva * self.rates.rete_iva_share,
        }
    }

    pub fn reteica(&self, base: f64) -> ReteicaResult {
        ReteicaResult {
            base,
            rete_ica: base * fraction(self.rates.rete_ica_pct),
        }
    }

    pub fn full_deduction(
        &self,
        base: f64,
        concept: RetentionConcept,
        is_iva_responsible: bool,
    ) -> FullDeductionResult {
        let iva = self.iva(base);
        let rete_fuente = self.retefuente(base, concept).retencion;
        let rete_iva = if is_iva_responsible {
            self.reteiva(base).rete_iva
        } else {
            0.0
        };
        let rete_ica = self.reteica(base).rete_ica;
        let total_retenciones = rete_fuente + rete_iva + rete_ica;

        FullDeductionResult {
            base,
            iva: iva.iva,
            total_con_iva: iva.total_con_iva,
            concepto: concept,
            rete_fuente,
            rete_iva,
            rete_ica,
            total_retenciones,
            neto_a_pagar: base + iva.iva - total_retenciones,
            beneficios_fiscales: FiscalBenefits {
                iva_descontable: iva.iva - rete_iva,
                credito_renta: rete_fuente,
                credito_ica: rete_ica,
            },
        }
    }
}

fn fraction(pct: f64) -> f64 {
    pct / 100.0
}
