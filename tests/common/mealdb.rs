//! In-process stand-in for the recipe lookup HTTP API.

use super::constants::*;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Default)]
struct MealDbState {
    records: HashMap<String, Value>,
    requests: AtomicUsize,
    flaky_recovered: AtomicBool,
}

/// Serves `GET /api/json/v1/1/lookup.php?i=<id>` on a random local port.
pub struct FakeMealDb {
    pub base_url: String,
    state: Arc<MealDbState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

fn pancakes() -> Value {
    let mut record = json!({
        "idMeal": RECIPE_PANCAKES_ID,
        "strMeal": "Pancakes",
        "strCategory": "Dessert",
        "strArea": "American",
        "strInstructions": "STEP 1\r\nMix everything.\r\n\r\nSTEP 2\r\nFry in a hot pan.",
        "strTags": "Breakfast,Sweet",
    });
    let fields = record.as_object_mut().unwrap();
    for (slot, (name, measure)) in [
        ("Flour", "100g"),
        ("Eggs", "2"),
        ("Milk", "300ml"),
        ("Sunflower Oil", "1 tbls"),
        ("Sugar", ""),
    ]
    .into_iter()
    .enumerate()
    {
        fields.insert(format!("strIngredient{}", slot + 1), json!(name));
        fields.insert(format!("strMeasure{}", slot + 1), json!(measure));
    }
    // Slots 6-20 come back blank or null, as the real API does.
    for slot in 6..=20 {
        let blank = if slot % 2 == 0 { json!("") } else { Value::Null };
        fields.insert(format!("strIngredient{}", slot), blank.clone());
        fields.insert(format!("strMeasure{}", slot), blank);
    }
    record
}

fn teriyaki() -> Value {
    let mut record = json!({
        "idMeal": RECIPE_TERIYAKI_ID,
        "strMeal": "Teriyaki Chicken Casserole",
        "strCategory": "Chicken",
        "strArea": "Japanese",
        "strInstructions": "Preheat oven to 350F.\r\nCombine soy sauce and sugar.\r\nBake for 35 minutes.",
        "strMealThumb": "https://www.themealdb.com/images/media/meals/wvpsxx1468256321.jpg",
        "strTags": "Meat,Casserole",
        "strYoutube": "https://www.youtube.com/watch?v=4aZr5hZXP_s",
    });
    let fields = record.as_object_mut().unwrap();
    let ingredients = [
        "soy sauce",
        "water",
        "brown sugar",
        "ground ginger",
        "minced garlic",
        "cornstarch",
        "chicken breasts",
        "stir-fry vegetables",
        "brown rice",
    ];
    for (slot, name) in ingredients.iter().enumerate() {
        fields.insert(format!("strIngredient{}", slot + 1), json!(name));
        fields.insert(format!("strMeasure{}", slot + 1), json!("1 cup"));
    }
    record
}

async fn lookup(
    State(state): State<Arc<MealDbState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let id = params.get("i").cloned().unwrap_or_default();

    if id == RECIPE_FLAKY_ID && !state.flaky_recovered.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))).into_response();
    }

    match state.records.get(&id) {
        Some(record) => Json(json!({ "meals": [record] })).into_response(),
        None => Json(json!({ "meals": null })).into_response(),
    }
}

impl FakeMealDb {
    pub async fn spawn() -> Self {
        let mut records = HashMap::new();
        records.insert(RECIPE_PANCAKES_ID.to_string(), pancakes());
        records.insert(RECIPE_TERIYAKI_ID.to_string(), teriyaki());
        records.insert(
            RECIPE_UNTITLED_ID.to_string(),
            json!({ "idMeal": RECIPE_UNTITLED_ID, "strIngredient1": "egg" }),
        );
        records.insert(
            RECIPE_FLAKY_ID.to_string(),
            json!({ "idMeal": RECIPE_FLAKY_ID, "strMeal": "Eventually Served Stew" }),
        );

        let state = Arc::new(MealDbState {
            records,
            ..Default::default()
        });
        let app = Router::new()
            .route("/api/json/v1/1/lookup.php", get(lookup))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake lookup service");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake lookup service failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}/api/json/v1/1/", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Makes the flaky recipe start answering normally.
    pub fn recover_flaky(&self) {
        self.state.flaky_recovered.store(true, Ordering::SeqCst);
    }
}
