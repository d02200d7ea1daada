use actix_identity::Identity;
use actix_web::{
    delete, get, post, put,
    web::{self, Data},
    HttpMessage, HttpRequest, HttpResponse, Responder,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    db,
    errors::{self, AppError},
    models::User,
    utils, AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
pub struct NewProduct {
    name: String,
    price: f64,
    description: Option<String>,
}

/// The allow-list for product updates: any key in the request body that is
/// not one of these fields is dropped during deserialization, never written.
#[derive(Deserialize)]
pub struct ProductUpdate {
    name: Option<String>,
    price: Option<f64>,
    description: Option<String>,
}

/// A cart item enriched with the referenced product's name and price.
#[derive(Serialize)]
pub struct CartEntry {
    id: i64,
    user_id: i64,
    product_id: i64,
    product_name: String,
    product_price: f64,
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({ "message": "Unauthorized" }))
}

/// Re-resolves the user id stored in the session cookie to a full user row.
/// Missing cookie, unparseable id, or a vanished row count as unauthenticated;
/// a database failure propagates as `AppError` instead.
async fn session_user(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Option<User>, AppError> {
    let identity = match identity {
        Some(identity) => identity,
        None => return Ok(None),
    };
    let id_str = match identity.id() {
        Ok(id) => id,
        Err(_) => return Ok(None),
    };
    let user_id = match id_str.parse::<i64>() {
        Ok(user_id) => user_id,
        Err(_) => return Ok(None),
    };
    let user = db::get_user_by_id(state, user_id).await.map_err(|e| {
        log::error!("Failed to resolve session user {}: {}", user_id, e);
        AppError::Database(e)
    })?;
    Ok(user)
}

/// Registers every route; shared between the binary and the tests.
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(login_handler)
        .service(logout_handler)
        .service(add_product_handler)
        .service(delete_product_handler)
        .service(list_products_handler)
        .service(get_product_handler)
        .service(update_product_handler)
        .service(add_to_cart_handler)
        .service(remove_from_cart_handler)
        .service(view_cart_handler)
        .service(checkout_handler);
}

#[post("/login")]
pub async fn login_handler(
    web::Json(body): web::Json<LoginRequest>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    let user = db::get_user_by_username(&state, &body.username).await.map_err(|e| {
        log::error!("Failed to look up user: {}", e);
        AppError::Database(e)
    })?;

    match user {
        Some(user) if utils::verify_password(&body.password, &user.pwd_hash) => {
            Identity::login(&request.extensions(), user.id.to_string())?;
            log::info!("User {} logged in", user.username);
            Ok(HttpResponse::Ok().json(json!({ "message": "Logged in successfully" })))
        }
        // Unknown username and wrong password answer identically.
        _ => Ok(HttpResponse::Unauthorized().json(json!({ "message": "Invalid credentials" }))),
    }
}

#[post("/logout")]
pub async fn logout_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let identity = match identity {
        Some(identity) => identity,
        None => return Ok(unauthorized()),
    };
    if session_user(&state, Some(&identity)).await?.is_none() {
        return Ok(unauthorized());
    }

    identity.logout();
    Ok(HttpResponse::Ok().json(json!({ "message": "Logged out successfully" })))
}

#[post("/api/products/add")]
pub async fn add_product_handler(
    web::Json(body): web::Json<NewProduct>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    if session_user(&state, identity.as_ref()).await?.is_none() {
        return Ok(unauthorized());
    }

    let description = body.description.unwrap_or_default();
    db::create_product(&state, &body.name, body.price, &description).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Product added successfully!" })))
}

#[delete("/api/products/delete/{id}")]
pub async fn delete_product_handler(
    path: web::Path<i64>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    if session_user(&state, identity.as_ref()).await?.is_none() {
        return Ok(unauthorized());
    }

    if db::delete_product(&state, path.into_inner()).await? {
        Ok(HttpResponse::Ok().json(json!({ "message": "Product deleted successfully!" })))
    } else {
        Ok(HttpResponse::NotFound().json(json!({ "message": "Product not found!" })))
    }
}

#[get("/api/products")]
pub async fn list_products_handler(state: Data<AppState>) -> Result<impl Responder, AppError> {
    let products = db::get_all_products(&state).await?;
    if products.is_empty() {
        // An empty catalog reports 404, not an empty array.
        return Ok(HttpResponse::NotFound().json(json!({ "message": "No products found!" })));
    }
    Ok(HttpResponse::Ok().json(products))
}

#[get("/api/products/{id}")]
pub async fn get_product_handler(
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    match db::get_product_by_id(&state, path.into_inner()).await? {
        Some(product) => Ok(HttpResponse::Ok().json(product)),
        None => Ok(HttpResponse::NotFound().json(json!({ "message": "Product not found!" }))),
    }
}

#[put("/api/products/update/{id}")]
pub async fn update_product_handler(
    path: web::Path<i64>,
    web::Json(body): web::Json<ProductUpdate>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    if session_user(&state, identity.as_ref()).await?.is_none() {
        return Ok(unauthorized());
    }

    let updated =
        db::update_product(&state, path.into_inner(), body.name, body.price, body.description)
            .await?;
    match updated {
        Some(_) => Ok(HttpResponse::Ok().json(json!({ "message": "Product updated successfully!" }))),
        None => Ok(HttpResponse::NotFound().json(json!({ "message": "Product not found!" }))),
    }
}

#[post("/api/cart/add/{product_id}")]
pub async fn add_to_cart_handler(
    path: web::Path<i64>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = match session_user(&state, identity.as_ref()).await? {
        Some(user) => user,
        None => return Ok(unauthorized()),
    };

    let product = match db::get_product_by_id(&state, path.into_inner()).await? {
        Some(product) => product,
        None => {
            return Ok(HttpResponse::BadRequest()
                .json(json!({ "message": "Failed to add item to the cart" })))
        }
    };

    if db::get_cart_item(&state, user.id, product.id).await?.is_some() {
        return Ok(
            HttpResponse::BadRequest().json(json!({ "message": "Product already in cart" }))
        );
    }

    match db::create_cart_item(&state, user.id, product.id).await {
        Ok(_) => {
            Ok(HttpResponse::Ok().json(json!({ "message": "Item added to the cart successfully" })))
        }
        // Lost the check-then-insert race; same outcome as the pre-check.
        Err(e) if errors::is_unique_violation(&e) => {
            Ok(HttpResponse::BadRequest().json(json!({ "message": "Product already in cart" })))
        }
        Err(e) => Err(AppError::Database(e)),
    }
}

#[delete("/api/cart/remove/{product_id}")]
pub async fn remove_from_cart_handler(
    path: web::Path<i64>,
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = match session_user(&state, identity.as_ref()).await? {
        Some(user) => user,
        None => return Ok(unauthorized()),
    };

    if db::delete_cart_item(&state, user.id, path.into_inner()).await? {
        Ok(HttpResponse::Ok().json(json!({ "message": "Item removed from the cart successfully" })))
    } else {
        Ok(HttpResponse::BadRequest()
            .json(json!({ "message": "Failed to remove item from the cart" })))
    }
}

#[get("/api/cart")]
pub async fn view_cart_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = match session_user(&state, identity.as_ref()).await? {
        Some(user) => user,
        None => return Ok(unauthorized()),
    };

    let items = db::get_cart_items(&state, user.id).await?;

    let mut cart_content = Vec::with_capacity(items.len());
    for item in items {
        // One product lookup per entry.
        let product = match db::get_product_by_id(&state, item.product_id).await? {
            Some(product) => product,
            None => {
                log::warn!(
                    "Cart item {} references missing product {}",
                    item.id,
                    item.product_id
                );
                continue;
            }
        };
        cart_content.push(CartEntry {
            id: item.id,
            user_id: item.user_id,
            product_id: item.product_id,
            product_name: product.name,
            product_price: product.price,
        });
    }

    Ok(HttpResponse::Ok().json(cart_content))
}

#[post("/api/cart/checkout")]
pub async fn checkout_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let user = match session_user(&state, identity.as_ref()).await? {
        Some(user) => user,
        None => return Ok(unauthorized()),
    };

    db::clear_cart(&state, user.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Checkout successful, cart has been cleared!" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_update_drops_unknown_keys() {
        let body = r#"{"name": "Widget", "id": 999, "pwd_hash": "sneaky"}"#;
        let update: ProductUpdate = serde_json::from_str(body).unwrap();
        assert_eq!(update.name.as_deref(), Some("Widget"));
        assert!(update.price.is_none());
        assert!(update.description.is_none());
    }

    #[test]
    fn new_product_description_is_optional() {
        let body = r#"{"name": "Widget", "price": 9.99}"#;
        let product: NewProduct = serde_json::from_str(body).unwrap();
        assert_eq!(product.name, "Widget");
        assert_eq!(product.price, 9.99);
        assert!(product.description.is_none());
    }

    #[test]
    fn cart_entry_serializes_enriched_shape() {
        let entry = CartEntry {
            id: 1,
            user_id: 2,
            product_id: 3,
            product_name: "Widget".to_string(),
            product_price: 9.99,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["product_name"], "Widget");
        assert_eq!(value["product_price"], 9.99);
        assert_eq!(value["user_id"], 2);
    }
}
