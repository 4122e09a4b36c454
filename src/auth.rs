use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared cleartext password for every wire client, whatever the user name.
#[derive(Debug)]
pub struct TableBookAuthSource {
    password: String,
}

impl TableBookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for TableBookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = ?login.user(), "wire login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
