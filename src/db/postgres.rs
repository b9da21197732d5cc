use crate::accounts::{
    new_order_no, AccountStore, Holding, OrderReceipt, OrderRequest, OrderSide, TradingAccount,
};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

/// Postgres-backed account store
pub struct PostgresAccountStore {
    pool: PgPool,
}

impl PostgresAccountStore {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres (accounts & orders)");

        Ok(Self { pool })
    }

    /// Create an active trading account
    pub async fn create_account(
        &self,
        name: &str,
        model_id: &str,
        initial_capital: f64,
    ) -> anyhow::Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (name, model_id, cash, is_active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(model_id)
        .bind(initial_capital)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        tracing::info!("Created account {} ({}) with ${:.2}", id, name, initial_capital);
        Ok(id)
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    async fn list_eligible_accounts(&self) -> anyhow::Result<Vec<TradingAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, model_id, cash
            FROM accounts
            WHERE is_active = TRUE AND model_id IS NOT NULL
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let accounts = rows
            .into_iter()
            .map(|row| TradingAccount {
                id: row.get("id"),
                name: row.get("name"),
                model_id: row.get("model_id"),
                cash: row.get("cash"),
            })
            .collect();

        Ok(accounts)
    }

    async fn count_eligible_accounts(&self) -> anyhow::Result<usize> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM accounts
            WHERE is_active = TRUE AND model_id IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn holdings(&self, account_id: i64) -> anyhow::Result<Vec<Holding>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, quantity, avg_cost
            FROM positions
            WHERE account_id = $1 AND quantity > 0
            ORDER BY symbol ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let holdings = rows
            .into_iter()
            .map(|row| {
                let quantity: i64 = row.get("quantity");
                Holding {
                    symbol: row.get("symbol"),
                    quantity: quantity.max(0) as u64,
                    avg_cost: row.get("avg_cost"),
                }
            })
            .collect();

        Ok(holdings)
    }

    async fn place_order(
        &self,
        account_id: i64,
        order: &OrderRequest,
    ) -> anyhow::Result<OrderReceipt> {
        if order.quantity == 0 {
            anyhow::bail!("Order quantity must be positive");
        }

        let quantity = i64::try_from(order.quantity).context("Order quantity out of range")?;
        let notional = order.notional();

        let mut tx = self.pool.begin().await?;

        let cash: f64 = sqlx::query("SELECT cash FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Account {} not found", account_id))?
            .get("cash");

        let held: i64 = sqlx::query(
            "SELECT quantity FROM positions WHERE account_id = $1 AND symbol = $2 FOR UPDATE",
        )
        .bind(account_id)
        .bind(&order.symbol)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.get("quantity"))
        .unwrap_or(0);

        match order.side {
            OrderSide::Buy => {
                if cash < notional {
                    anyhow::bail!("Insufficient cash: need ${:.2}, have ${:.2}", notional, cash);
                }

                sqlx::query(
                    "UPDATE accounts SET cash = cash - $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(account_id)
                .bind(notional)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO positions (account_id, symbol, quantity, avg_cost)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (account_id, symbol) DO UPDATE SET
                        avg_cost = (positions.avg_cost * positions.quantity + $4 * $3)
                                   / (positions.quantity + $3),
                        quantity = positions.quantity + $3,
                        updated_at = NOW()
                    "#,
                )
                .bind(account_id)
                .bind(&order.symbol)
                .bind(quantity)
                .bind(order.price)
                .execute(&mut *tx)
                .await?;
            }
            OrderSide::Sell => {
                if held < quantity {
                    anyhow::bail!(
                        "Insufficient {}: need {}, have {}",
                        order.symbol,
                        quantity,
                        held
                    );
                }

                sqlx::query(
                    r#"
                    UPDATE positions SET quantity = quantity - $3, updated_at = NOW()
                    WHERE account_id = $1 AND symbol = $2
                    "#,
                )
                .bind(account_id)
                .bind(&order.symbol)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE accounts SET cash = cash + $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(account_id)
                .bind(notional)
                .execute(&mut *tx)
                .await?;
            }
        }

        let order_no = new_order_no();
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_no, account_id, symbol, name, side, quantity, price, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'FILLED')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&order_no)
        .bind(account_id)
        .bind(&order.symbol)
        .bind(&order.name)
        .bind(order.side.to_string())
        .bind(quantity)
        .bind(order.price)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Saved order {} for account {} to Postgres", order_no, account_id);

        Ok(OrderReceipt {
            order_no,
            executed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database_url() -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/papertrade_test".to_string())
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_create_and_trade() {
        let store = PostgresAccountStore::new(&database_url())
            .await
            .expect("Failed to connect to Postgres");

        let id = store.create_account("Test Trader", "gpt", 1000.0).await.unwrap();

        let buy = OrderRequest {
            symbol: "ETH".to_string(),
            name: "Ethereum".to_string(),
            side: OrderSide::Buy,
            quantity: 2,
            price: 100.0,
        };
        let receipt = store.place_order(id, &buy).await.unwrap();
        assert!(receipt.executed);

        let holdings = store.holdings(id).await.unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].quantity, 2);

        let accounts = store.list_eligible_accounts().await.unwrap();
        let account = accounts.iter().find(|a| a.id == id).unwrap();
        assert_eq!(account.cash, 800.0);
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_oversell_rejected() {
        let store = PostgresAccountStore::new(&database_url())
            .await
            .expect("Failed to connect to Postgres");

        let id = store.create_account("Test Seller", "gpt", 1000.0).await.unwrap();

        let sell = OrderRequest {
            symbol: "SOL".to_string(),
            name: "Solana".to_string(),
            side: OrderSide::Sell,
            quantity: 1,
            price: 100.0,
        };
        assert!(store.place_order(id, &sell).await.is_err());
    }
}
