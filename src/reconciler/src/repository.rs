//! PostgreSQL-backed record store.
//!
//! Every contract address is first claimed in the `contracts` registry and the
//! variant row is written in the same transaction, so one address can never
//! hold two variants even across concurrent writers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{
    Address, CategoricalEvent, CentralizedOracle, ContractMeta, DescriptionVariant,
    EventDescription, Market, OracleState, OutcomeToken, Record, RecordId, RecordKind,
    ScalarEvent, UltimateOracle,
};
use crate::store::RecordStore;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Map constraint violations onto the store's error classes.
fn db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return StoreError::DuplicateKey(db.message().to_string()),
            Some(FOREIGN_KEY_VIOLATION) => return StoreError::ForeignKey(db.message().to_string()),
            _ => {}
        }
    }
    StoreError::Database(e)
}

fn table(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::CentralizedOracle => "centralized_oracles",
        RecordKind::UltimateOracle => "ultimate_oracles",
        RecordKind::ScalarEvent => "scalar_events",
        RecordKind::CategoricalEvent => "categorical_events",
        RecordKind::Market => "markets",
        RecordKind::OutcomeToken => "outcome_tokens",
    }
}

fn address(row: &PgRow, column: &str) -> Result<Address, StoreError> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("{} {:?}: {}", column, raw, e)))
}

fn optional_address(row: &PgRow, column: &str) -> Result<Option<Address>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| StoreError::Corrupt(format!("{} {:?}: {}", column, s, e)))
    })
    .transpose()
}

fn meta(row: &PgRow) -> Result<ContractMeta, StoreError> {
    Ok(ContractMeta {
        address: address(row, "address")?,
        factory: address(row, "factory")?,
        creator: address(row, "creator")?,
        creation_block: row.try_get("creation_block")?,
        creation_date_time: row.try_get::<DateTime<Utc>, _>("creation_date_time")?,
    })
}

fn oracle_state(row: &PgRow) -> Result<OracleState, StoreError> {
    Ok(OracleState {
        is_outcome_set: row.try_get("is_outcome_set")?,
        outcome: row.try_get("outcome")?,
    })
}

fn record_from_row(kind: RecordKind, row: &PgRow) -> Result<Record, StoreError> {
    let record = match kind {
        RecordKind::CentralizedOracle => Record::CentralizedOracle(CentralizedOracle {
            meta: meta(row)?,
            owner: address(row, "owner")?,
            event_description: row.try_get("event_description")?,
            state: oracle_state(row)?,
        }),
        RecordKind::UltimateOracle => Record::UltimateOracle(UltimateOracle {
            meta: meta(row)?,
            forwarded_oracle: optional_address(row, "forwarded_oracle")?,
            collateral_token: address(row, "collateral_token")?,
            spread_multiplier: row.try_get::<Decimal, _>("spread_multiplier")?,
            challenge_period: row.try_get("challenge_period")?,
            challenge_amount: row.try_get::<Decimal, _>("challenge_amount")?,
            front_runner_period: row.try_get("front_runner_period")?,
            state: oracle_state(row)?,
        }),
        RecordKind::ScalarEvent => Record::ScalarEvent(ScalarEvent {
            meta: meta(row)?,
            collateral_token: address(row, "collateral_token")?,
            oracle: address(row, "oracle")?,
            lower_bound: row.try_get::<Decimal, _>("lower_bound")?,
            upper_bound: row.try_get::<Decimal, _>("upper_bound")?,
        }),
        RecordKind::CategoricalEvent => Record::CategoricalEvent(CategoricalEvent {
            meta: meta(row)?,
            collateral_token: address(row, "collateral_token")?,
            oracle: address(row, "oracle")?,
            outcome_count: row.try_get("outcome_count")?,
        }),
        RecordKind::Market => Record::Market(Market {
            meta: meta(row)?,
            event: address(row, "event")?,
            market_maker: address(row, "market_maker")?,
            fee: row.try_get::<Decimal, _>("fee")?,
            revenue: row.try_get::<Decimal, _>("revenue")?,
            collected_fees: row.try_get::<Decimal, _>("collected_fees")?,
        }),
        RecordKind::OutcomeToken => Record::OutcomeToken(OutcomeToken {
            address: address(row, "address")?,
            event: address(row, "event")?,
            index: row.try_get("outcome_index")?,
        }),
    };
    Ok(record)
}

fn description_from_row(row: &PgRow) -> Result<EventDescription, StoreError> {
    let ipfs_hash: String = row.try_get("ipfs_hash")?;
    let kind: String = row.try_get("kind")?;

    let variant = match kind.as_str() {
        "scalar" => {
            let unit: Option<String> = row.try_get("unit")?;
            let decimals: Option<i64> = row.try_get("decimals")?;
            match (unit, decimals) {
                (Some(unit), Some(decimals)) => DescriptionVariant::Scalar { unit, decimals },
                _ => {
                    return Err(StoreError::Corrupt(format!(
                        "scalar description {} lacks unit or decimals",
                        ipfs_hash
                    )))
                }
            }
        }
        "categorical" => {
            let outcomes: Option<Json<Vec<String>>> = row.try_get("outcomes")?;
            match outcomes {
                Some(Json(outcomes)) => DescriptionVariant::Categorical { outcomes },
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "categorical description {} lacks outcomes",
                        ipfs_hash
                    )))
                }
            }
        }
        other => {
            return Err(StoreError::Corrupt(format!(
                "description {} has unknown kind {:?}",
                ipfs_hash, other
            )))
        }
    };

    Ok(EventDescription {
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        resolution_date: row.try_get::<DateTime<Utc>, _>("resolution_date")?,
        ipfs_hash,
        variant,
    })
}

/// Insert the variant row for `record` inside an open transaction.
async fn insert_variant(
    tx: &mut Transaction<'_, Postgres>,
    record: &Record,
) -> Result<(), sqlx::Error> {
    match record {
        Record::CentralizedOracle(r) => {
            sqlx::query(
                r#"
                INSERT INTO centralized_oracles
                    (address, factory, creator, creation_block, creation_date_time,
                     owner, event_description, is_outcome_set, outcome)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(r.meta.address.to_string())
            .bind(r.meta.factory.to_string())
            .bind(r.meta.creator.to_string())
            .bind(r.meta.creation_block)
            .bind(r.meta.creation_date_time)
            .bind(r.owner.to_string())
            .bind(&r.event_description)
            .bind(r.state.is_outcome_set)
            .bind(r.state.outcome)
            .execute(&mut **tx)
            .await?;
        }
        Record::UltimateOracle(r) => {
            sqlx::query(
                r#"
                INSERT INTO ultimate_oracles
                    (address, factory, creator, creation_block, creation_date_time,
                     forwarded_oracle, collateral_token, spread_multiplier, challenge_period,
                     challenge_amount, front_runner_period, is_outcome_set, outcome)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(r.meta.address.to_string())
            .bind(r.meta.factory.to_string())
            .bind(r.meta.creator.to_string())
            .bind(r.meta.creation_block)
            .bind(r.meta.creation_date_time)
            .bind(r.forwarded_oracle.map(|a| a.to_string()))
            .bind(r.collateral_token.to_string())
            .bind(r.spread_multiplier)
            .bind(r.challenge_period)
            .bind(r.challenge_amount)
            .bind(r.front_runner_period)
            .bind(r.state.is_outcome_set)
            .bind(r.state.outcome)
            .execute(&mut **tx)
            .await?;
        }
        Record::ScalarEvent(r) => {
            sqlx::query(
                r#"
                INSERT INTO scalar_events
                    (address, factory, creator, creation_block, creation_date_time,
                     collateral_token, oracle, lower_bound, upper_bound)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(r.meta.address.to_string())
            .bind(r.meta.factory.to_string())
            .bind(r.meta.creator.to_string())
            .bind(r.meta.creation_block)
            .bind(r.meta.creation_date_time)
            .bind(r.collateral_token.to_string())
            .bind(r.oracle.to_string())
            .bind(r.lower_bound)
            .bind(r.upper_bound)
            .execute(&mut **tx)
            .await?;
        }
        Record::CategoricalEvent(r) => {
            sqlx::query(
                r#"
                INSERT INTO categorical_events
                    (address, factory, creator, creation_block, creation_date_time,
                     collateral_token, oracle, outcome_count)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(r.meta.address.to_string())
            .bind(r.meta.factory.to_string())
            .bind(r.meta.creator.to_string())
            .bind(r.meta.creation_block)
            .bind(r.meta.creation_date_time)
            .bind(r.collateral_token.to_string())
            .bind(r.oracle.to_string())
            .bind(r.outcome_count)
            .execute(&mut **tx)
            .await?;
        }
        Record::Market(r) => {
            sqlx::query(
                r#"
                INSERT INTO markets
                    (address, factory, creator, creation_block, creation_date_time,
                     event, market_maker, fee, revenue, collected_fees)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(r.meta.address.to_string())
            .bind(r.meta.factory.to_string())
            .bind(r.meta.creator.to_string())
            .bind(r.meta.creation_block)
            .bind(r.meta.creation_date_time)
            .bind(r.event.to_string())
            .bind(r.market_maker.to_string())
            .bind(r.fee)
            .bind(r.revenue)
            .bind(r.collected_fees)
            .execute(&mut **tx)
            .await?;
        }
        Record::OutcomeToken(r) => {
            sqlx::query(
                r#"
                INSERT INTO outcome_tokens (address, event, outcome_index)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(r.address.to_string())
            .bind(r.event.to_string())
            .bind(r.index)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

/// Record store over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_kind(&self, address: &Address) -> Result<Option<RecordKind>, StoreError> {
        let kind: Option<String> =
            sqlx::query_scalar("SELECT kind FROM contracts WHERE address = $1")
                .bind(address.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        kind.map(|k| k.parse().map_err(StoreError::Corrupt))
            .transpose()
    }

    async fn get(
        &self,
        kind: RecordKind,
        address: &Address,
    ) -> Result<Option<Record>, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE address = $1", table(kind));
        let row = sqlx::query(&sql)
            .bind(address.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|r| record_from_row(kind, &r)).transpose()
    }

    async fn put(&self, record: &Record) -> Result<RecordId, StoreError> {
        let id = record.id();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("INSERT INTO contracts (address, kind) VALUES ($1, $2)")
            .bind(id.address.to_string())
            .bind(id.kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        insert_variant(&mut tx, record).await.map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        debug!("Stored {}", id);
        Ok(id)
    }

    async fn get_description(
        &self,
        ipfs_hash: &str,
    ) -> Result<Option<EventDescription>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT ipfs_hash, kind, title, description, resolution_date, unit, decimals, outcomes
            FROM event_descriptions
            WHERE ipfs_hash = $1
            "#,
        )
        .bind(ipfs_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|r| description_from_row(&r)).transpose()
    }

    async fn put_description(&self, description: &EventDescription) -> Result<(), StoreError> {
        let (unit, decimals, outcomes) = match &description.variant {
            DescriptionVariant::Scalar { unit, decimals } => {
                (Some(unit.as_str()), Some(*decimals), None)
            }
            DescriptionVariant::Categorical { outcomes } => (None, None, Some(Json(outcomes))),
        };

        // An already populated description is left untouched.
        sqlx::query(
            r#"
            INSERT INTO event_descriptions
                (ipfs_hash, kind, title, description, resolution_date, unit, decimals, outcomes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (ipfs_hash) DO UPDATE SET
                kind = EXCLUDED.kind,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                resolution_date = EXCLUDED.resolution_date,
                unit = EXCLUDED.unit,
                decimals = EXCLUDED.decimals,
                outcomes = EXCLUDED.outcomes
            WHERE event_descriptions.title = ''
            "#,
        )
        .bind(&description.ipfs_hash)
        .bind(description.kind_str())
        .bind(&description.title)
        .bind(&description.description)
        .bind(description.resolution_date)
        .bind(unit)
        .bind(decimals)
        .bind(outcomes)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn set_oracle_outcome(&self, address: &Address, outcome: i64) -> Result<(), StoreError> {
        let kind = match self.find_kind(address).await? {
            Some(kind) if kind.is_oracle() => kind,
            _ => {
                return Err(StoreError::ForeignKey(format!(
                    "oracle {} does not exist",
                    address
                )))
            }
        };

        let sql = format!(
            "UPDATE {} SET is_outcome_set = TRUE, outcome = $2 WHERE address = $1",
            table(kind)
        );
        let result = sqlx::query(&sql)
            .bind(address.to_string())
            .bind(outcome)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!(
                "{} {} registered without a row",
                kind, address
            )));
        }
        Ok(())
    }

    async fn load_cursor(&self) -> Result<Option<u64>, StoreError> {
        let block: Option<i64> =
            sqlx::query_scalar("SELECT block_number FROM indexer_cursor WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        block
            .map(|b| {
                u64::try_from(b).map_err(|_| StoreError::Corrupt(format!("negative cursor {}", b)))
            })
            .transpose()
    }

    async fn save_cursor(&self, block: u64) -> Result<(), StoreError> {
        let block = i64::try_from(block)
            .map_err(|_| StoreError::Corrupt(format!("block {} out of range", block)))?;

        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (id, block_number) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                updated_at = NOW()
            "#,
        )
        .bind(block)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}
