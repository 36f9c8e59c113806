//! Variety rotation for seller catalogs.

use std::sync::Arc;

use agora_core::{ActionKind, AgentId, Catalog, DecisionLog, ProductName, VariantId, VarietyTable};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// One product switching variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantChange {
    /// Product line.
    pub product: ProductName,
    /// Outgoing variant.
    pub from: VariantId,
    /// Incoming variant.
    pub to: VariantId,
}

/// What caused a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    /// Some product fell below the stock floor.
    LowStock,
    /// The periodic timer fired.
    Periodic,
    /// Every Nth recorded sale.
    SaleCount,
}

/// Swaps product variants while keeping stock.
#[derive(Debug, Clone)]
pub struct VarietyRotator {
    varieties: Arc<VarietyTable>,
}

impl VarietyRotator {
    /// Creates a rotator over a variety table.
    #[must_use]
    pub const fn new(varieties: Arc<VarietyTable>) -> Self {
        Self { varieties }
    }

    /// Moves every known product to a random other variant.
    ///
    /// A product with no alternative keeps its variant. Products missing from
    /// the variety table are left alone.
    pub fn rotate<R: Rng + ?Sized>(&self, catalog: &mut Catalog, rng: &mut R) -> Vec<VariantChange> {
        let mut changes = Vec::new();
        for (product, entry) in catalog.iter_mut() {
            let variants = self.varieties.variants_of(product);
            if variants.is_empty() {
                continue;
            }
            let alternatives: Vec<&VariantId> = variants.iter().filter(|v| **v != entry.variant).collect();
            let next = alternatives.choose(&mut *rng).map_or_else(|| entry.variant.clone(), |v| (*v).clone());
            let Some(ethics) = self.varieties.ethics_of(&next) else {
                continue;
            };
            if next != entry.variant {
                changes.push(VariantChange {
                    product: product.clone(),
                    from: entry.variant.clone(),
                    to: next.clone(),
                });
            }
            entry.ethics = ethics.clone();
            entry.variant = next;
        }
        changes
    }

    /// Switches one product to `variant`, keeping its stock.
    ///
    /// Returns `None` if the product is not stocked, the variant is unknown,
    /// or it is already current.
    pub fn switch_variant(&self, catalog: &mut Catalog, product: &str, variant: &str) -> Option<VariantChange> {
        let ethics = self.varieties.ethics_of(variant)?;
        let entry = catalog.get_mut(product)?;
        if entry.variant == variant {
            return None;
        }
        let change = VariantChange {
            product: product.to_owned(),
            from: std::mem::replace(&mut entry.variant, variant.to_owned()),
            to: variant.to_owned(),
        };
        entry.ethics = ethics.clone();
        Some(change)
    }

    /// Rotates and appends a `rotacion_variedades` record.
    pub fn rotate_and_record<R: Rng + ?Sized>(
        &self,
        actor: &AgentId,
        catalog: &mut Catalog,
        rng: &mut R,
        trigger: RotationTrigger,
        log: &DecisionLog,
    ) -> Vec<VariantChange> {
        let changes = self.rotate(catalog, rng);
        debug!(seller = %actor, ?trigger, changed = changes.len(), "varieties rotated");
        log.append(
            actor,
            ActionKind::VarietyRotation,
            json!({ "motivo": trigger, "cambios": changes }),
        );
        changes
    }
}

/// Returns true if any product sits below `floor`.
#[must_use]
pub fn has_low_stock(catalog: &Catalog, floor: u32) -> bool {
    catalog.iter().any(|(_, entry)| entry.stock < floor)
}
