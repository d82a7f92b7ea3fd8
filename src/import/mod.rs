//! Recipe import: fetch from the lookup service, transform, persist.

mod handler;
mod lookup;
mod transform;

pub use handler::{ImportError, ImportHandler, ImportOutcome, ImportPayload};
pub use lookup::{LookupError, MealDbClient, MealRecord, RecipeLookup};
pub use transform::{transform_meal, TransformError, INGREDIENT_SLOTS};
