//! Create or update rows in the `login` table.

use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use sqlx::{MySql, MySqlPool, QueryBuilder};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Account {0} does not exist so a password is required!")]
    PasswordRequired(String),

    #[error("invalid sex {0:?}, expected M, F or S")]
    InvalidSex(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// `login.sex`: `S` marks the inter-server account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Server,
}

impl Sex {
    pub fn as_str(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Server => "S",
        }
    }

    /// `M` or `F` at random.
    pub fn random() -> Self {
        if rand::random::<bool>() {
            Sex::Male
        } else {
            Sex::Female
        }
    }
}

impl FromStr for Sex {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M" => Ok(Sex::Male),
            "F" => Ok(Sex::Female),
            "S" => Ok(Sex::Server),
            _ => Err(AccountError::InvalidSex(s.to_string())),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state of one account. `None` fields are left as they are on
/// update (and take the table default on insert, except `sex`).
#[derive(Debug, Clone, Default)]
pub struct AccountRequest {
    pub userid: String,
    pub account_id: Option<u32>,
    pub password: Option<String>,
    pub sex: Option<Sex>,
    pub group_id: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(u32),
    Updated(u32),
}

/// Compute MD5 of `input` and return it as a lowercase hex string.
fn md5_hex(input: &str) -> String {
    hex::encode(Md5::new().chain_update(input).finalize())
}

/// The value stored in `login.user_pass`.
pub fn stored_password(password: &str, md5_passwords: bool) -> String {
    if md5_passwords {
        md5_hex(password)
    } else {
        password.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Text(String),
    Int(i64),
}

/// Columns to write for `req`. `creating` adds `account_id` and a random
/// sex when none was asked for.
fn columns(req: &AccountRequest, md5_passwords: bool, creating: bool) -> Vec<(&'static str, Value)> {
    let mut cols = vec![("userid", Value::Text(req.userid.clone()))];
    if creating {
        if let Some(id) = req.account_id {
            cols.push(("account_id", Value::Int(id.into())));
        }
    }
    if let Some(password) = &req.password {
        cols.push((
            "user_pass",
            Value::Text(stored_password(password, md5_passwords)),
        ));
    }
    let sex = match req.sex {
        Some(sex) => Some(sex),
        None if creating => Some(Sex::random()),
        None => None,
    };
    if let Some(sex) = sex {
        cols.push(("sex", Value::Text(sex.as_str().to_string())));
    }
    if let Some(group_id) = req.group_id {
        cols.push(("group_id", Value::Int(group_id.into())));
    }
    cols
}

/// `account_id` of the existing row: by id when given, else by name.
async fn find_account(pool: &MySqlPool, req: &AccountRequest) -> Result<Option<u32>, sqlx::Error> {
    let row: Option<(u32,)> = match req.account_id {
        Some(id) => {
            sqlx::query_as("SELECT `account_id` FROM `login` WHERE `account_id` = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT `account_id` FROM `login` WHERE `userid` = ?")
                .bind(&req.userid)
                .fetch_optional(pool)
                .await?
        }
    };
    Ok(row.map(|(id,)| id))
}

/// Insert the account or update the existing one.
pub async fn upsert(
    pool: &MySqlPool,
    req: &AccountRequest,
    md5_passwords: bool,
) -> Result<Outcome, AccountError> {
    match find_account(pool, req).await? {
        Some(account_id) => {
            let mut qb: QueryBuilder<MySql> = QueryBuilder::new("UPDATE `login` SET ");
            {
                let mut set = qb.separated(", ");
                for (col, value) in columns(req, md5_passwords, false) {
                    set.push(format!("`{col}` = "));
                    match value {
                        Value::Text(s) => set.push_bind_unseparated(s),
                        Value::Int(n) => set.push_bind_unseparated(n),
                    };
                }
            }
            qb.push(" WHERE `account_id` = ").push_bind(account_id);
            qb.build().execute(pool).await?;
            tracing::info!("[account] [updated] Account {} ({account_id}) updated", req.userid);
            Ok(Outcome::Updated(account_id))
        }
        None => {
            if req.password.is_none() {
                return Err(AccountError::PasswordRequired(req.userid.clone()));
            }
            let cols = columns(req, md5_passwords, true);

            let mut qb: QueryBuilder<MySql> = QueryBuilder::new("INSERT INTO `login` (");
            {
                let mut names = qb.separated(", ");
                for (col, _) in &cols {
                    names.push(format!("`{col}`"));
                }
            }
            qb.push(") VALUES (");
            {
                let mut values = qb.separated(", ");
                for (_, value) in cols {
                    match value {
                        Value::Text(s) => values.push_bind(s),
                        Value::Int(n) => values.push_bind(n),
                    };
                }
            }
            qb.push(")");

            let result = qb.build().execute(pool).await?;
            let account_id = req
                .account_id
                .unwrap_or(u32::try_from(result.last_insert_id()).unwrap_or(u32::MAX));
            tracing::info!(
                "[account] [created] Account {} ({account_id}) created; GM group: {:?}",
                req.userid,
                req.group_id
            );
            Ok(Outcome::Created(account_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cols: &[(&'static str, Value)]) -> Vec<&'static str> {
        cols.iter().map(|(c, _)| *c).collect()
    }

    #[test]
    fn test_md5_password() {
        assert_eq!(stored_password("p1", false), "p1");
        assert_eq!(
            stored_password("password", true),
            "5f4dcc3b5aa765d61d8327deb882cf99"
        );
    }

    #[test]
    fn test_sex_parse() {
        assert_eq!("m".parse::<Sex>().unwrap(), Sex::Male);
        assert_eq!("F".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!("S".parse::<Sex>().unwrap(), Sex::Server);
        assert!(matches!("x".parse::<Sex>(), Err(AccountError::InvalidSex(_))));
    }

    #[test]
    fn test_random_sex_is_player_sex() {
        for _ in 0..20 {
            assert_ne!(Sex::random(), Sex::Server);
        }
    }

    #[test]
    fn test_create_columns() {
        let req = AccountRequest {
            userid: "s1".into(),
            account_id: Some(1),
            password: Some("p1".into()),
            sex: Some(Sex::Server),
            group_id: None,
        };
        let cols = columns(&req, false, true);
        assert_eq!(names(&cols), vec!["userid", "account_id", "user_pass", "sex"]);
        assert!(cols.contains(&("sex", Value::Text("S".into()))));
        assert!(cols.contains(&("user_pass", Value::Text("p1".into()))));
    }

    #[test]
    fn test_create_picks_a_sex() {
        let req = AccountRequest {
            userid: "bob".into(),
            password: Some("pw".into()),
            ..Default::default()
        };
        assert!(names(&columns(&req, false, true)).contains(&"sex"));
    }

    #[test]
    fn test_update_columns_only_what_was_given() {
        let req = AccountRequest {
            userid: "bob".into(),
            account_id: Some(2000001),
            group_id: Some(99),
            ..Default::default()
        };
        let cols = columns(&req, true, false);
        assert_eq!(names(&cols), vec!["userid", "group_id"]);
    }
}
