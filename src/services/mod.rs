pub mod analytics;
pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod fees;
pub mod gateway;
pub mod inventory;
pub mod shipping;

use uuid::Uuid;

use crate::auth::AuthUser;

/// Who is calling: a signed-in customer, a guest holding a cart secret, or both.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user: Option<AuthUser>,
    pub cart_secret: Option<String>,
}

impl Caller {
    pub fn guest(cart_secret: Option<String>) -> Self {
        Self {
            user: None,
            cart_secret,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.user_id)
    }

    /// Email from the session, if the token carried one
    pub fn session_email(&self) -> Option<&str> {
        self.user
            .as_ref()
            .and_then(|u| u.email.as_deref())
            .filter(|e| !e.trim().is_empty())
    }
}
