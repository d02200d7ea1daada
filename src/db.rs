use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};

use crate::{
    errors::AppError,
    models::{CartItem, Product, User},
    utils, AppState,
};

pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Opens (creating if missing) the SQLite database and applies the embedded
/// migrations, so the schema exists before the first request.
pub async fn connect(database_url: &str) -> Result<SqlitePool, AppError> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        // Cart items rely on ON DELETE CASCADE, so FK enforcement must be on.
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePool::connect_with(opts).await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub async fn get_user_by_username(
    state: &AppState,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&pool)
        .await?;
    Ok(user)
}

pub async fn get_user_by_id(state: &AppState, id: i64) -> Result<Option<User>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&pool)
        .await?;
    Ok(user)
}

pub async fn create_user(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<User, AppError> {
    let created_at = chrono::Utc::now().to_string();
    let pwd_hash = utils::hash_password(password)?;
    let pool = state.db_pool.clone();
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, pwd_hash, created_at, updated_at) \
         VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(username)
    .bind(&pwd_hash)
    .bind(&created_at)
    .bind(&created_at)
    .fetch_one(&pool)
    .await?;
    log::info!("User created: id={} username={}", user.id, user.username);
    Ok(user)
}

/// Startup bootstrap: users have no registration endpoint, so the first one
/// can be provisioned from the environment. An existing username is left
/// untouched rather than having its hash overwritten.
pub async fn ensure_seed_user(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<(), AppError> {
    if get_user_by_username(state, username).await?.is_some() {
        log::info!("Seed user {} already present", username);
        return Ok(());
    }
    create_user(state, username, password).await?;
    Ok(())
}

pub async fn create_product(
    state: &AppState,
    name: &str,
    price: f64,
    description: &str,
) -> Result<Product, sqlx::Error> {
    let created_at = chrono::Utc::now().to_string();
    let pool = state.db_pool.clone();
    let product = sqlx::query_as::<_, Product>(
        "INSERT INTO products (name, price, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(price)
    .bind(description)
    .bind(&created_at)
    .bind(&created_at)
    .fetch_one(&pool)
    .await?;
    log::info!("Product created: id={} name={}", product.id, product.name);
    Ok(product)
}

pub async fn get_product_by_id(state: &AppState, id: i64) -> Result<Option<Product>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
        .bind(id)
        .fetch_optional(&pool)
        .await?;
    Ok(product)
}

pub async fn get_all_products(state: &AppState) -> Result<Vec<Product>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products ORDER BY id")
        .fetch_all(&pool)
        .await?;
    Ok(products)
}

/// Partial update restricted to the mutable columns (name, price,
/// description); `updated_at` is refreshed on every call. Returns the updated
/// row, or None when no product has that id.
pub async fn update_product(
    state: &AppState,
    id: i64,
    name: Option<String>,
    price: Option<f64>,
    description: Option<String>,
) -> Result<Option<Product>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let updated_at = chrono::Utc::now().to_string();

    let mut query = String::from("UPDATE products SET updated_at = ?");
    if name.is_some() {
        query.push_str(", name = ?");
    }
    if price.is_some() {
        query.push_str(", price = ?");
    }
    if description.is_some() {
        query.push_str(", description = ?");
    }
    query.push_str(" WHERE id = ? RETURNING *");

    let mut q = sqlx::query_as::<_, Product>(&query);
    q = q.bind(&updated_at);
    if let Some(name) = &name {
        q = q.bind(name);
    }
    if let Some(price) = price {
        q = q.bind(price);
    }
    if let Some(description) = &description {
        q = q.bind(description);
    }
    q = q.bind(id);

    let product = q.fetch_optional(&pool).await?;
    if let Some(product) = &product {
        log::info!("Product updated: id={}", product.id);
    }
    Ok(product)
}

/// Deletes a product; its cart items go with it via ON DELETE CASCADE.
/// Returns false when no product had that id.
pub async fn delete_product(state: &AppState, id: i64) -> Result<bool, sqlx::Error> {
    let pool = state.db_pool.clone();
    let result = sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await?;
    let deleted = result.rows_affected() > 0;
    if deleted {
        log::info!("Product with id {} deleted", id);
    }
    Ok(deleted)
}

pub async fn get_cart_item(
    state: &AppState,
    user_id: i64,
    product_id: i64,
) -> Result<Option<CartItem>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let item =
        sqlx::query_as::<_, CartItem>("SELECT * FROM cart_items WHERE user_id = ? AND product_id = ?")
            .bind(user_id)
            .bind(product_id)
            .fetch_optional(&pool)
            .await?;
    Ok(item)
}

/// Inserts the (user, product) pair; a concurrent duplicate trips the unique
/// index and surfaces as a database error the caller can inspect with
/// `errors::is_unique_violation`.
pub async fn create_cart_item(
    state: &AppState,
    user_id: i64,
    product_id: i64,
) -> Result<CartItem, sqlx::Error> {
    let created_at = chrono::Utc::now().to_string();
    let pool = state.db_pool.clone();
    let item = sqlx::query_as::<_, CartItem>(
        "INSERT INTO cart_items (user_id, product_id, created_at) \
         VALUES (?, ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(product_id)
    .bind(&created_at)
    .fetch_one(&pool)
    .await?;
    log::info!(
        "Cart item created: id={} user_id={} product_id={}",
        item.id,
        item.user_id,
        item.product_id
    );
    Ok(item)
}

pub async fn delete_cart_item(
    state: &AppState,
    user_id: i64,
    product_id: i64,
) -> Result<bool, sqlx::Error> {
    let pool = state.db_pool.clone();
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ? AND product_id = ?")
        .bind(user_id)
        .bind(product_id)
        .execute(&pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_cart_items(state: &AppState, user_id: i64) -> Result<Vec<CartItem>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let items = sqlx::query_as::<_, CartItem>(
        "SELECT * FROM cart_items WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;
    Ok(items)
}

/// Checkout: one statement clears the whole cart, so the multi-row delete is
/// atomic without an explicit transaction.
pub async fn clear_cart(state: &AppState, user_id: i64) -> Result<u64, sqlx::Error> {
    let pool = state.db_pool.clone();
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ?")
        .bind(user_id)
        .execute(&pool)
        .await?;
    log::info!(
        "Cart cleared for user {}: {} items removed",
        user_id,
        result.rows_affected()
    );
    Ok(result.rows_affected())
}
