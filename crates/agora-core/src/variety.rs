//! Product variants and their fixed ethics profiles.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::types::{Catalog, CatalogEntry, EthicsVector, ProductName, VariantId};

/// Product lines carried by every seller.
pub const PRODUCTS: [&str; 9] = [
    "Manzana", "Leche", "Pan", "Carne", "Arroz", "Pasta", "Huevos", "Jugo", "Queso",
];

/// Ethical criteria a variant is scored on.
pub const ETHICS_CRITERIA: [&str; 7] = [
    "huella_ecologica",
    "producto_ecologico",
    "pocos_intermediarios",
    "alta_calidad",
    "origen_nacional",
    "origen_local",
    "origen_pais_desarrollo",
];

/// Variants generated per product by [`VarietyTable::standard`].
pub const VARIANTS_PER_PRODUCT: u32 = 5;

/// Registry of product → variants and variant → ethics profile.
///
/// Immutable once built; shared by every agent of a simulation.
#[derive(Debug, Clone, Default)]
pub struct VarietyTable {
    variants: BTreeMap<ProductName, Vec<VariantId>>,
    ethics: HashMap<VariantId, EthicsVector>,
    owners: HashMap<VariantId, ProductName>,
}

impl VarietyTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard market: nine products, five variants each.
    ///
    /// Variant `i` of every product gets the same linear ethics profile.
    #[must_use]
    pub fn standard() -> Self {
        let mut table = Self::new();
        for product in PRODUCTS {
            for i in 1..=VARIANTS_PER_PRODUCT {
                table.insert_variant(product, format!("{product}_{i}"), standard_ethics(i));
            }
        }
        table
    }

    /// Registers a variant of `product` with its ethics profile.
    pub fn insert_variant(
        &mut self,
        product: impl Into<ProductName>,
        variant: impl Into<VariantId>,
        ethics: EthicsVector,
    ) {
        let product = product.into();
        let variant = variant.into();
        let variants = self.variants.entry(product.clone()).or_default();
        if !variants.contains(&variant) {
            variants.push(variant.clone());
        }
        self.owners.insert(variant.clone(), product);
        self.ethics.insert(variant, ethics);
    }

    /// Product names in order.
    pub fn products(&self) -> impl Iterator<Item = &ProductName> {
        self.variants.keys()
    }

    /// Variants registered for a product (empty if unknown).
    #[must_use]
    pub fn variants_of(&self, product: &str) -> &[VariantId] {
        self.variants.get(product).map_or(&[], Vec::as_slice)
    }

    /// Ethics profile of a variant.
    #[must_use]
    pub fn ethics_of(&self, variant: &str) -> Option<&EthicsVector> {
        self.ethics.get(variant)
    }

    /// Product a variant belongs to.
    #[must_use]
    pub fn product_of(&self, variant: &str) -> Option<&ProductName> {
        self.owners.get(variant)
    }

    /// Builds a catalog entry for `variant` holding `stock` units.
    #[must_use]
    pub fn entry_for(&self, variant: &str, stock: u32) -> Option<CatalogEntry> {
        self.ethics
            .get(variant)
            .map(|ethics| CatalogEntry::new(variant, stock, ethics.clone()))
    }

    /// One random variant per product, stock drawn uniformly from `stock`.
    pub fn random_catalog<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        stock: RangeInclusive<u32>,
    ) -> Catalog {
        self.variants
            .iter()
            .filter_map(|(product, variants)| {
                let variant = variants.choose(&mut *rng)?;
                let entry = self.entry_for(variant, rng.gen_range(stock.clone()))?;
                Some((product.clone(), entry))
            })
            .collect()
    }
}

fn standard_ethics(i: u32) -> EthicsVector {
    let i = f64::from(i);
    let values = [
        0.1 * i,
        1.0 - 0.1 * i,
        0.05 * i,
        0.2 * i,
        0.15 * i,
        0.1 * i,
        0.05 * i,
    ];
    ETHICS_CRITERIA
        .iter()
        .zip(values)
        .map(|(criterion, value)| ((*criterion).to_string(), round2(value)))
        .collect()
}

/// Rounds to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
