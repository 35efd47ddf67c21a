use serde::{Deserialize, Serialize};

pub const GRAMS: &str = "g";
pub const MILLILITRES: &str = "ml";
pub const PIECES: &str = "pcs";

/// A quantity expressed in its canonical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuantity {
    pub quantity: f64,
    pub unit: String,
}

/// Convert a quantity to its canonical unit so that amounts of one ingredient
/// can be summed across recipes.
///
/// Mass becomes grams and volume becomes millilitres. Units that are neither
/// are kept as written (lowercased), with the common piece spellings folded
/// into `pcs`. Mass and volume are never converted into each other.
#[must_use]
pub fn normalize(quantity: f64, unit: &str) -> NormalizedQuantity {
    let lower = unit.trim().to_lowercase();
    let (factor, canonical) = match lower.as_str() {
        "g" | "gram" | "grams" => (1.0, GRAMS),
        "kg" | "kilogram" | "kilograms" => (1000.0, GRAMS),
        "mg" | "milligram" | "milligrams" => (0.001, GRAMS),
        "lb" | "lbs" | "pound" | "pounds" => (453.592, GRAMS),
        "oz" | "ounce" | "ounces" => (28.3495, GRAMS),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => (1.0, MILLILITRES),
        "cl" | "centiliter" | "centilitre" => (10.0, MILLILITRES),
        "dl" | "deciliter" | "decilitre" => (100.0, MILLILITRES),
        "l" | "liter" | "liters" | "litre" | "litres" => (1000.0, MILLILITRES),
        "tsp" | "teaspoon" | "teaspoons" => (5.0, MILLILITRES),
        "tbsp" | "tablespoon" | "tablespoons" => (15.0, MILLILITRES),
        "cup" | "cups" => (240.0, MILLILITRES),
        "fl oz" | "floz" | "fluid ounce" | "fluid ounces" => (29.5735, MILLILITRES),
        "" | "pc" | "pcs" | "piece" | "pieces" | "x" => (1.0, PIECES),
        _ => {
            return NormalizedQuantity {
                quantity,
                unit: lower,
            };
        }
    };
    NormalizedQuantity {
        quantity: quantity * factor,
        unit: canonical.to_string(),
    }
}

/// Whether two quantities can be summed without conversion.
#[must_use]
pub fn compatible(a: &NormalizedQuantity, b: &NormalizedQuantity) -> bool {
    a.unit == b.unit
}

/// Add `amount` to the total already held for its unit, or start a new one.
pub fn accumulate(totals: &mut Vec<NormalizedQuantity>, amount: NormalizedQuantity) {
    match totals.iter_mut().find(|t| compatible(t, &amount)) {
        Some(total) => total.quantity += amount.quantity,
        None => totals.push(amount),
    }
}

/// Same units with quantities within `epsilon`, ignoring order.
#[must_use]
pub fn same_totals(a: &[NormalizedQuantity], b: &[NormalizedQuantity], epsilon: f64) -> bool {
    a.len() == b.len()
        && a.iter().all(|x| {
            b.iter()
                .any(|y| compatible(x, y) && (x.quantity - y.quantity).abs() <= epsilon)
        })
}
