//! Postgres `ToolStore` adapter backed by the pgvector extension.
//!
//! Scores are computed in SQL: semantic similarity is
//! `1 - (embedding <=> query)` clamped to `[0, 1]`, lexical rank is
//! `ts_rank_cd(..., 32)` (length-normalized into `[0, 1]`). Every value is
//! bound; no identifier is ever interpolated from input. The embedding
//! dimension is the only formatted DDL parameter and is validated as an
//! integer at construction.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use toolhub_core::{
    validation, ExecutionRecord, ExecutionStats, Result, Tool, ToolDraft, ToolExecution,
    ToolhubError, ToolPatch,
};

use super::{
    EmbeddingUpdate, RegistryStats, SearchHit, SearchOptions, ToolFilter, ToolStore,
};

/// Searchable document expression shared by the lexical queries. Tags are
/// flattened through a lateral join aliased `tags_text`.
const TS_DOC: &str = "to_tsvector('english', t.name || ' ' || t.description || ' ' || t.category \
                      || ' ' || coalesce(tags_text.txt, ''))";

const TAGS_LATERAL: &str = "left join lateral (select string_agg(x, ' ') as txt \
                            from jsonb_array_elements_text(t.tags) x) tags_text on true";

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgToolStore {
    pool: PgPool,
    dimension: usize,
}

fn db_err(e: sqlx::Error) -> ToolhubError {
    ToolhubError::Database(e.to_string())
}

fn not_found(id: i64) -> ToolhubError {
    ToolhubError::NotFound {
        name: format!("id {id}"),
        suggestions: Vec::new(),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn tool_from_row(row: &PgRow) -> Result<Tool> {
    let tags: serde_json::Value = row.try_get("tags").map_err(db_err)?;
    let implementation_type: String = row.try_get("implementation_type").map_err(db_err)?;
    let embedding: Option<Vector> = row.try_get("embedding").map_err(db_err)?;
    Ok(Tool {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        category: row.try_get("category").map_err(db_err)?,
        tags: serde_json::from_value(tags)
            .map_err(|e| ToolhubError::Database(format!("malformed tags column: {e}")))?,
        input_schema: row.try_get("input_schema").map_err(db_err)?,
        output_schema: row.try_get("output_schema").map_err(db_err)?,
        implementation_type: implementation_type.parse()?,
        implementation_code: row.try_get("implementation_code").map_err(db_err)?,
        version: row.try_get("version").map_err(db_err)?,
        embedding: embedding.map(|v| v.to_vec()),
        is_active: row.try_get("is_active").map_err(db_err)?,
        metadata: row.try_get("metadata").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn hit_from_row(row: &PgRow, semantic: bool, lexical: bool) -> Result<SearchHit> {
    let score: f32 = row.try_get("score").map_err(db_err)?;
    Ok(SearchHit {
        tool: tool_from_row(row)?,
        score,
        semantic: if semantic {
            Some(row.try_get("semantic").unwrap_or(score))
        } else {
            None
        },
        lexical: if lexical {
            Some(row.try_get("lexical").unwrap_or(score))
        } else {
            None
        },
    })
}

impl PgToolStore {
    /// Wraps an existing pool. `ensure_schema` must run before first use on a
    /// fresh database.
    pub fn new(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Applies the schema (idempotent) and verifies the live vector column
    /// dimension matches the configured one, failing loudly on mismatch.
    pub async fn ensure_schema(&self) -> Result<()> {
        let dim = self.dimension;
        let ddl = format!(
            r#"
            create extension if not exists vector;

            create table if not exists tools (
                id bigint generated always as identity primary key,
                name varchar(255) not null unique,
                description text not null,
                category varchar(100) not null,
                tags jsonb not null default '[]'::jsonb,
                input_schema jsonb not null,
                output_schema jsonb,
                implementation_type varchar(50) not null,
                implementation_code text,
                version varchar(50) not null default '1.0.0',
                embedding vector({dim}),
                is_active boolean not null default true,
                metadata jsonb not null default '{{}}'::jsonb,
                created_at timestamptz not null default now(),
                updated_at timestamptz not null default now()
            );

            create index if not exists ix_tools_category on tools (category);
            create index if not exists ix_tools_active_category on tools (is_active, category);
            create index if not exists ix_tools_embedding on tools
                using ivfflat (embedding vector_cosine_ops) with (lists = 100);

            create table if not exists tool_executions (
                id bigint generated always as identity primary key,
                tool_id bigint references tools(id) on delete set null,
                tool_name varchar(255) not null,
                arguments jsonb not null,
                output jsonb,
                status varchar(20) not null,
                error_message text,
                duration_ms bigint not null,
                started_at timestamptz not null
            );

            create index if not exists ix_executions_tool_status
                on tool_executions (tool_id, status);
            create index if not exists ix_executions_started_at
                on tool_executions (started_at);
            "#
        );
        sqlx::raw_sql(&ddl).execute(&self.pool).await.map_err(db_err)?;
        self.verify_dimension().await
    }

    /// Compares the live `tools.embedding` column dimension against the
    /// configured one. pgvector stores the dimension in `atttypmod`.
    pub async fn verify_dimension(&self) -> Result<()> {
        let live: i32 = sqlx::query_scalar(
            "select atttypmod from pg_attribute \
             where attrelid = 'tools'::regclass and attname = 'embedding'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        if live as usize != self.dimension {
            return Err(ToolhubError::Config(format!(
                "embedding column dimension {live} does not match configured dimension {}; \
                 run the dimension rebuild before serving",
                self.dimension
            )));
        }
        Ok(())
    }

    /// Dimension change procedure: drop index, alter column, null embeddings,
    /// rebuild the index. Every tool needs re-indexing afterwards.
    pub async fn rebuild_dimension(&self, dimension: usize) -> Result<()> {
        let ddl = format!(
            r#"
            drop index if exists ix_tools_embedding;
            alter table tools alter column embedding type vector({dimension}) using null;
            update tools set embedding = null;
            create index ix_tools_embedding on tools
                using ivfflat (embedding vector_cosine_ops) with (lists = 100);
            "#
        );
        sqlx::raw_sql(&ddl).execute(&self.pool).await.map_err(db_err)?;
        tracing::warn!(
            target: "toolhub::store",
            dimension,
            "embedding column rebuilt; all embeddings nulled and need reindexing"
        );
        Ok(())
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> Result<Tool> {
        let row = sqlx::query("select * from tools t where t.id = $1 for update")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| not_found(id))?;
        tool_from_row(&row)
    }
}

#[async_trait]
impl ToolStore for PgToolStore {
    async fn insert(&self, draft: &ToolDraft, embedding: Option<Vec<f32>>) -> Result<Tool> {
        if let Some(vec) = &embedding {
            validation::validate_embedding(self.dimension, vec)?;
        }
        let tags = serde_json::to_value(&draft.tags)
            .map_err(|e| ToolhubError::InvalidInput(e.to_string()))?;
        let row = sqlx::query(
            r#"
            insert into tools
                (name, description, category, tags, input_schema, output_schema,
                 implementation_type, implementation_code, version, embedding, metadata)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            returning *
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(&draft.category)
        .bind(&tags)
        .bind(&draft.input_schema)
        .bind(&draft.output_schema)
        .bind(draft.implementation_type.as_str())
        .bind(&draft.implementation_code)
        .bind(&draft.version)
        .bind(embedding.map(Vector::from))
        .bind(&draft.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ToolhubError::NameConflict(draft.name.clone())
            } else {
                db_err(e)
            }
        })?;
        tool_from_row(&row)
    }

    async fn update(&self, id: i64, patch: &ToolPatch, embedding: EmbeddingUpdate) -> Result<Tool> {
        if let EmbeddingUpdate::Set(vec) = &embedding {
            validation::validate_embedding(self.dimension, vec)?;
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut tool = Self::fetch_for_update(&mut tx, id).await?;

        if let Some(v) = &patch.name {
            tool.name = v.clone();
        }
        if let Some(v) = &patch.description {
            tool.description = v.clone();
        }
        if let Some(v) = &patch.category {
            tool.category = v.clone();
        }
        if let Some(v) = &patch.tags {
            tool.tags = v.clone();
        }
        if let Some(v) = &patch.input_schema {
            tool.input_schema = v.clone();
        }
        if let Some(v) = &patch.output_schema {
            tool.output_schema = Some(v.clone());
        }
        if let Some(v) = patch.implementation_type {
            tool.implementation_type = v;
        }
        if let Some(v) = &patch.implementation_code {
            tool.implementation_code = Some(v.clone());
        }
        if let Some(v) = &patch.version {
            tool.version = v.clone();
        }
        if let Some(v) = &patch.metadata {
            tool.metadata = v.clone();
        }
        match embedding {
            EmbeddingUpdate::Keep => {}
            EmbeddingUpdate::Clear => tool.embedding = None,
            EmbeddingUpdate::Set(vec) => tool.embedding = Some(vec),
        }

        let tags = serde_json::to_value(&tool.tags)
            .map_err(|e| ToolhubError::InvalidInput(e.to_string()))?;
        let row = sqlx::query(
            r#"
            update tools set
                name = $2, description = $3, category = $4, tags = $5,
                input_schema = $6, output_schema = $7, implementation_type = $8,
                implementation_code = $9, version = $10, embedding = $11,
                metadata = $12, updated_at = now()
            where id = $1
            returning *
            "#,
        )
        .bind(id)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(&tool.category)
        .bind(&tags)
        .bind(&tool.input_schema)
        .bind(&tool.output_schema)
        .bind(tool.implementation_type.as_str())
        .bind(&tool.implementation_code)
        .bind(&tool.version)
        .bind(tool.embedding.clone().map(Vector::from))
        .bind(&tool.metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ToolhubError::NameConflict(tool.name.clone())
            } else {
                db_err(e)
            }
        })?;
        let updated = tool_from_row(&row)?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<Tool> {
        let row = sqlx::query(
            "update tools set is_active = $2, updated_at = now() where id = $1 returning *",
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| not_found(id))?;
        tool_from_row(&row)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("delete from tools where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Tool>> {
        let row = sqlx::query("select * from tools t where t.id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(tool_from_row).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Tool>> {
        let row = sqlx::query("select * from tools t where t.name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(tool_from_row).transpose()
    }

    async fn list(
        &self,
        filter: &ToolFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Tool>, i64)> {
        let rows = sqlx::query(
            r#"
            select * from tools t
            where ($1::text is null or t.category = $1)
              and ($2::bool = false or t.is_active)
            order by t.name asc
            limit $3 offset $4
            "#,
        )
        .bind(&filter.category)
        .bind(filter.active_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let total: i64 = sqlx::query_scalar(
            r#"
            select count(*) from tools t
            where ($1::text is null or t.category = $1)
              and ($2::bool = false or t.is_active)
            "#,
        )
        .bind(&filter.category)
        .bind(filter.active_only)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let tools = rows.iter().map(tool_from_row).collect::<Result<Vec<_>>>()?;
        Ok((tools, total))
    }

    async fn set_embedding(&self, id: i64, embedding: Option<&[f32]>) -> Result<()> {
        if let Some(vec) = embedding {
            validation::validate_embedding(self.dimension, vec)?;
        }
        let result = sqlx::query(
            "update tools set embedding = $2, updated_at = now() where id = $1",
        )
        .bind(id)
        .bind(embedding.map(|v| Vector::from(v.to_vec())))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn tools_without_embeddings(&self, limit: i64) -> Result<Vec<Tool>> {
        let rows = sqlx::query(
            "select * from tools t where t.embedding is null order by t.id asc limit $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(tool_from_row).collect()
    }

    async fn semantic_search(
        &self,
        query: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        validation::validate_embedding(self.dimension, query)?;
        let rows = sqlx::query(
            r#"
            select t.*,
                   least(greatest(1 - (t.embedding <=> $1), 0), 1)::float4 as score
            from tools t
            where t.embedding is not null
              and ($2::text is null or t.category = $2)
              and ($3::bool = false or t.is_active)
              and least(greatest(1 - (t.embedding <=> $1), 0), 1) >= $4
            order by score desc, t.id asc
            limit $5
            "#,
        )
        .bind(Vector::from(query.to_vec()))
        .bind(&opts.category)
        .bind(opts.active_only)
        .bind(opts.min_similarity)
        .bind(opts.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(|r| hit_from_row(r, true, false)).collect()
    }

    async fn lexical_search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let sql = format!(
            r#"
            select t.*,
                   (ts_rank_cd({TS_DOC}, plainto_tsquery('english', $1), 32))::float4 as score
            from tools t
            {TAGS_LATERAL}
            where plainto_tsquery('english', $1) @@ {TS_DOC}
              and ($2::text is null or t.category = $2)
              and ($3::bool = false or t.is_active)
            order by score desc, t.id asc
            limit $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(&opts.category)
            .bind(opts.active_only)
            .bind(opts.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|r| hit_from_row(r, false, true)).collect()
    }

    async fn hybrid_search(
        &self,
        query_text: &str,
        query_vec: &[f32],
        alpha: f32,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        validation::validate_embedding(self.dimension, query_vec)?;
        // Candidates: union of the top-K of each leg; K never below the limit.
        let k = opts.limit.max(20) as i64;
        let sql = format!(
            r#"
            with sem as (
                select t.id from tools t
                where t.embedding is not null
                  and ($5::text is null or t.category = $5)
                  and ($6::bool = false or t.is_active)
                order by t.embedding <=> $1 asc, t.id asc
                limit $7
            ),
            lex as (
                select t.id from tools t
                {TAGS_LATERAL}
                where t.embedding is not null
                  and ($5::text is null or t.category = $5)
                  and ($6::bool = false or t.is_active)
                  and plainto_tsquery('english', $2) @@ {TS_DOC}
                order by ts_rank_cd({TS_DOC}, plainto_tsquery('english', $2), 32) desc, t.id asc
                limit $7
            ),
            cand as (select id from sem union select id from lex)
            select t.*,
                   least(greatest(1 - (t.embedding <=> $1), 0), 1)::float4 as semantic,
                   (ts_rank_cd({TS_DOC}, plainto_tsquery('english', $2), 32))::float4 as lexical,
                   ($3 * least(greatest(1 - (t.embedding <=> $1), 0), 1)
                    + (1 - $3) * ts_rank_cd({TS_DOC}, plainto_tsquery('english', $2), 32))::float4
                       as score
            from tools t
            join cand on cand.id = t.id
            {TAGS_LATERAL}
            where least(greatest(1 - (t.embedding <=> $1), 0), 1) >= $4
            order by score desc, t.id asc
            limit $8
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(Vector::from(query_vec.to_vec()))
            .bind(query_text)
            .bind(alpha)
            .bind(opts.min_similarity)
            .bind(&opts.category)
            .bind(opts.active_only)
            .bind(k)
            .bind(opts.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|r| hit_from_row(r, true, true)).collect()
    }

    async fn find_similar(
        &self,
        tool_id: i64,
        limit: usize,
        exclude_self: bool,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>> {
        let tool = self.get(tool_id).await?.ok_or_else(|| not_found(tool_id))?;
        let embedding = tool.embedding.ok_or_else(|| {
            ToolhubError::InvalidInput(format!("tool {tool_id} has no embedding"))
        })?;
        let opts = SearchOptions {
            limit: limit + usize::from(exclude_self),
            min_similarity,
            category: None,
            active_only: true,
        };
        let mut hits = self.semantic_search(&embedding, &opts).await?;
        if exclude_self {
            hits.retain(|h| h.tool.id != tool_id);
        }
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count_indexed(&self, active_only: bool) -> Result<i64> {
        sqlx::query_scalar(
            "select count(*) from tools t \
             where t.embedding is not null and ($1::bool = false or t.is_active)",
        )
        .bind(active_only)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_categories(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "select distinct category from tools where is_active order by category",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn stats(&self) -> Result<RegistryStats> {
        let totals = sqlx::query(
            "select count(*) as total, \
                    count(*) filter (where is_active) as active, \
                    count(embedding) as indexed \
             from tools",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let mut stats = RegistryStats {
            total: totals.try_get("total").map_err(db_err)?,
            active: totals.try_get("active").map_err(db_err)?,
            indexed: totals.try_get("indexed").map_err(db_err)?,
            ..Default::default()
        };

        let by_category =
            sqlx::query("select category, count(*) as n from tools group by category")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        for row in &by_category {
            stats.by_category.insert(
                row.try_get("category").map_err(db_err)?,
                row.try_get("n").map_err(db_err)?,
            );
        }

        let by_impl = sqlx::query(
            "select implementation_type, count(*) as n from tools group by implementation_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        for row in &by_impl {
            stats.by_implementation.insert(
                row.try_get("implementation_type").map_err(db_err)?,
                row.try_get("n").map_err(db_err)?,
            );
        }
        Ok(stats)
    }

    async fn record_execution(&self, record: &ExecutionRecord) -> Result<ToolExecution> {
        let id: i64 = sqlx::query_scalar(
            r#"
            insert into tool_executions
                (tool_id, tool_name, arguments, output, status, error_message,
                 duration_ms, started_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8)
            returning id
            "#,
        )
        .bind(record.tool_id)
        .bind(&record.tool_name)
        .bind(&record.arguments)
        .bind(&record.output)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.duration_ms)
        .bind(record.started_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(ToolExecution {
            id,
            record: record.clone(),
        })
    }

    async fn execution_stats(&self, tool_id: i64) -> Result<ExecutionStats> {
        let row = sqlx::query(
            r#"
            select count(*) as total,
                   count(*) filter (where status = 'SUCCESS') as succeeded,
                   count(*) filter (where status in ('ERROR', 'TIMEOUT')) as failed,
                   avg(duration_ms)::float8 as avg_duration_ms
            from tool_executions
            where tool_id = $1
            "#,
        )
        .bind(tool_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(ExecutionStats {
            total: row.try_get("total").map_err(db_err)?,
            succeeded: row.try_get("succeeded").map_err(db_err)?,
            failed: row.try_get("failed").map_err(db_err)?,
            avg_duration_ms: row.try_get("avg_duration_ms").map_err(db_err)?,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("select 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(db_err)
    }
}

