use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};

use crate::model::{Id, TypeRegistry};
use crate::store::rows::{
    ConfigurationRow, DirectoryRow, EdgeRow, EntityRow, EntryKind, EntryRow, InstanceRow,
    InstanceRowKind, LockRow, PackageRow, ParameterInsert, ParameterRow, ReleaseRow,
    StagedConfiguration, StagedTemplates, StoredValue, StreamEntryRow, SubsystemRow, TemplateRow,
    TemplateRowKind, ValueInsert, ValueRow, WriteBatch, WriteStage,
};
use crate::store::traits::{
    ConfigurationStore, DirectoryStore, IdentityStore, LockStore, ReleaseStore, StagingStore,
    Store, WriteStore,
};

/// Rows per multi-row INSERT statement.
const INSERT_CHUNK: usize = 1000;

const CONFIGURATION_SELECT: &str = "SELECT c.id, c.release_id, r.tag AS release_tag, c.directory_id, c.name, \
     c.version, c.created_at, c.creator, c.process_name, c.description \
     FROM configurations c JOIN software_releases r ON r.id = c.release_id";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 20).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn directory_row(row: &PgRow) -> DirectoryRow {
    DirectoryRow {
        id: row.get("id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

fn configuration_row(row: &PgRow) -> ConfigurationRow {
    ConfigurationRow {
        id: row.get("id"),
        release_id: row.get("release_id"),
        release_tag: row.get("release_tag"),
        directory_id: row.get("directory_id"),
        name: row.get("name"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        creator: row.get("creator"),
        process_name: row.get("process_name"),
        description: row.get("description"),
    }
}

fn lock_row(row: &PgRow) -> LockRow {
    LockRow {
        directory_id: row.get("directory_id"),
        name: row.get("name"),
        user: row.get("user_name"),
    }
}

fn release_row(row: &PgRow) -> ReleaseRow {
    ReleaseRow {
        id: row.get("id"),
        tag: row.get("tag"),
    }
}

#[async_trait::async_trait]
impl IdentityStore for PostgresStore {
    async fn allocate_id(&self) -> Result<Id> {
        let id: Id = sqlx::query_scalar("INSERT INTO identities DEFAULT VALUES RETURNING id")
            .fetch_one(&self.pool)
            .await
            .context("Failed to allocate identity")?;
        Ok(id)
    }

    async fn allocate_ids(&self, count: usize) -> Result<Vec<Id>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut ids: Vec<Id> = sqlx::query_scalar(
            "INSERT INTO identities (id) \
             SELECT nextval('identities_id_seq') FROM generate_series(1, $1) \
             RETURNING id",
        )
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to allocate identities")?;
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl DirectoryStore for PostgresStore {
    async fn list_directories(&self) -> Result<Vec<DirectoryRow>> {
        let rows = sqlx::query("SELECT id, parent_id, name, created_at FROM directories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list directories")?;
        Ok(rows.iter().map(directory_row).collect())
    }

    async fn get_directory(&self, id: Id) -> Result<Option<DirectoryRow>> {
        let row = sqlx::query("SELECT id, parent_id, name, created_at FROM directories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch directory")?;
        Ok(row.as_ref().map(directory_row))
    }

    async fn insert_directory(&self, parent_id: Id, name: &str) -> Result<DirectoryRow> {
        let row = sqlx::query(
            "INSERT INTO directories (parent_id, name) VALUES ($1, $2) \
             RETURNING id, parent_id, name, created_at",
        )
        .bind(parent_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create directory")?;
        Ok(directory_row(&row))
    }

    async fn delete_empty_directory(&self, id: Id) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM directories d WHERE d.id = $1 \
             AND NOT EXISTS (SELECT 1 FROM directories c WHERE c.parent_id = d.id) \
             AND NOT EXISTS (SELECT 1 FROM configurations c WHERE c.directory_id = d.id)",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to delete directory")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ConfigurationStore for PostgresStore {
    async fn list_configurations(&self) -> Result<Vec<ConfigurationRow>> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY c.directory_id, c.name, c.version",
            CONFIGURATION_SELECT
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list configurations")?;
        Ok(rows.iter().map(configuration_row).collect())
    }

    async fn get_configuration(&self, id: Id) -> Result<Option<ConfigurationRow>> {
        let row = sqlx::query(&format!("{} WHERE c.id = $1", CONFIGURATION_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch configuration")?;
        Ok(row.as_ref().map(configuration_row))
    }

    async fn list_versions(&self, directory_id: Id, name: &str) -> Result<Vec<ConfigurationRow>> {
        let rows = sqlx::query(&format!(
            "{} WHERE c.directory_id = $1 AND c.name = $2 ORDER BY c.version",
            CONFIGURATION_SELECT
        ))
        .bind(directory_id)
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list configuration versions")?;
        Ok(rows.iter().map(configuration_row).collect())
    }

    async fn latest_version(&self, directory_id: Id, name: &str) -> Result<Option<i32>> {
        let version: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(version) FROM configurations WHERE directory_id = $1 AND name = $2",
        )
        .bind(directory_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch latest configuration version")?;
        Ok(version)
    }
}

#[async_trait::async_trait]
impl LockStore for PostgresStore {
    async fn list_locks(&self) -> Result<Vec<LockRow>> {
        let rows = sqlx::query("SELECT directory_id, name, user_name FROM locked_configurations")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list locks")?;
        Ok(rows.iter().map(lock_row).collect())
    }

    async fn get_lock(&self, directory_id: Id, name: &str) -> Result<Option<LockRow>> {
        let row = sqlx::query(
            "SELECT directory_id, name, user_name FROM locked_configurations \
             WHERE directory_id = $1 AND name = $2",
        )
        .bind(directory_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch lock")?;
        Ok(row.as_ref().map(lock_row))
    }

    async fn insert_lock(&self, lock: &LockRow) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO locked_configurations (directory_id, name, user_name) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(lock.directory_id)
        .bind(&lock.name)
        .bind(&lock.user)
        .execute(&self.pool)
        .await
        .context("Failed to insert lock")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_lock(&self, directory_id: Id, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM locked_configurations WHERE directory_id = $1 AND name = $2")
            .bind(directory_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to delete lock")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ReleaseStore for PostgresStore {
    async fn list_releases(&self) -> Result<Vec<ReleaseRow>> {
        let rows = sqlx::query("SELECT id, tag FROM software_releases ORDER BY tag")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list releases")?;
        Ok(rows.iter().map(release_row).collect())
    }

    async fn release_by_tag(&self, tag: &str) -> Result<Option<ReleaseRow>> {
        let row = sqlx::query("SELECT id, tag FROM software_releases WHERE tag = $1")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch release")?;
        Ok(row.as_ref().map(release_row))
    }

    async fn release_by_id(&self, id: Id) -> Result<Option<ReleaseRow>> {
        let row = sqlx::query("SELECT id, tag FROM software_releases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch release")?;
        Ok(row.as_ref().map(release_row))
    }

    async fn type_registry(&self) -> Result<TypeRegistry> {
        let pairs = |rows: Vec<PgRow>| -> Vec<(Id, String)> {
            rows.iter().map(|r| (r.get("id"), r.get("name"))).collect()
        };
        let module_rows = sqlx::query("SELECT id, name FROM module_types")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load module types")?;
        let parameter_rows = sqlx::query("SELECT id, name FROM parameter_types")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load parameter types")?;
        Ok(TypeRegistry::from_rows(pairs(module_rows), pairs(parameter_rows)))
    }
}

async fn read_parameters(conn: &mut PgConnection) -> Result<(Vec<ParameterRow>, Vec<ValueRow>)> {
    let parameters: Vec<ParameterRow> = sqlx::query(
        "SELECT id, type_id, name, tracked, hex, position, parent_id FROM tmp_parameters \
         ORDER BY parent_id, position",
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to read staged parameters")?
    .iter()
    .map(|row| ParameterRow {
        id: row.get("id"),
        type_id: row.get("type_id"),
        name: row.get("name"),
        tracked: row.get("tracked"),
        hex: row.get("hex"),
        position: row.get("position"),
        parent_id: row.get("parent_id"),
    })
    .collect();

    let rows = sqlx::query(
        "SELECT parameter_id, position, bool_value, int_value, real_value, text_value, hex \
         FROM tmp_values ORDER BY parameter_id, position",
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to read staged values")?;

    let mut values = Vec::with_capacity(rows.len());
    for row in &rows {
        let parameter_id: Id = row.get("parameter_id");
        let value = if let Some(b) = row.get::<Option<bool>, _>("bool_value") {
            StoredValue::Bool(b)
        } else if let Some(i) = row.get::<Option<i64>, _>("int_value") {
            StoredValue::Int(i)
        } else if let Some(f) = row.get::<Option<f64>, _>("real_value") {
            StoredValue::Real(f)
        } else if let Some(s) = row.get::<Option<String>, _>("text_value") {
            StoredValue::Text(s)
        } else {
            return Err(anyhow!("staged value of parameter {} is empty", parameter_id));
        };
        values.push(ValueRow {
            parameter_id,
            position: row.get("position"),
            value,
            hex: row.get("hex"),
        });
    }
    Ok((parameters, values))
}

async fn read_staged_templates(conn: &mut PgConnection) -> Result<StagedTemplates> {
    let rows = sqlx::query(
        "SELECT id, kind, type_id, name, cvs_tag, package_id FROM tmp_templates ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to read staged templates")?;

    let mut templates = Vec::with_capacity(rows.len());
    for row in &rows {
        let kind: String = row.get("kind");
        templates.push(TemplateRow {
            id: row.get("id"),
            kind: TemplateRowKind::from_name(&kind)
                .ok_or_else(|| anyhow!("unknown template kind '{}'", kind))?,
            type_id: row.get("type_id"),
            name: row.get("name"),
            cvs_tag: row.get("cvs_tag"),
            package_id: row.get("package_id"),
        });
    }

    let packages: Vec<PackageRow> = sqlx::query(
        "SELECT id, subsystem_id, name FROM software_packages \
         WHERE id IN (SELECT package_id FROM tmp_templates)",
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to read software packages")?
    .iter()
    .map(|row| PackageRow {
        id: row.get("id"),
        subsystem_id: row.get("subsystem_id"),
        name: row.get("name"),
    })
    .collect();

    let subsystems: Vec<SubsystemRow> = sqlx::query(
        "SELECT id, name FROM software_subsystems WHERE id IN \
         (SELECT subsystem_id FROM software_packages WHERE id IN (SELECT package_id FROM tmp_templates))",
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to read software subsystems")?
    .iter()
    .map(|row| SubsystemRow {
        id: row.get("id"),
        name: row.get("name"),
    })
    .collect();

    let (parameters, values) = read_parameters(conn).await?;
    Ok(StagedTemplates {
        subsystems,
        packages,
        templates,
        parameters,
        values,
    })
}

async fn read_entries(conn: &mut PgConnection, table: &str) -> Result<Vec<EntryRow>> {
    let rows = sqlx::query(&format!(
        "SELECT owner_id, child_id, position, kind FROM {} ORDER BY owner_id, position",
        table
    ))
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("Failed to read {}", table))?;

    rows.iter()
        .map(|row| {
            let kind: String = row.get("kind");
            Ok(EntryRow {
                owner_id: row.get("owner_id"),
                child_id: row.get("child_id"),
                position: row.get("position"),
                kind: EntryKind::from_name(&kind).ok_or_else(|| anyhow!("unknown entry kind '{}'", kind))?,
            })
        })
        .collect()
}

impl PostgresStore {
    async fn stage_templates_with(&self, call: &str, bind_id: Id, name: Option<&str>) -> Result<StagedTemplates> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        let query = sqlx::query(call).bind(bind_id);
        let query = match name {
            Some(name) => query.bind(name),
            None => query,
        };
        query
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Staging call '{}' failed", call))?;
        read_staged_templates(&mut *conn).await
    }
}

#[async_trait::async_trait]
impl StagingStore for PostgresStore {
    async fn stage_release(&self, release_id: Id) -> Result<StagedTemplates> {
        self.stage_templates_with("SELECT load_templates($1)", release_id, None)
            .await
    }

    async fn stage_configuration_templates(&self, configuration_id: Id) -> Result<StagedTemplates> {
        self.stage_templates_with("SELECT load_templates_for_config($1)", configuration_id, None)
            .await
    }

    async fn stage_template(&self, release_id: Id, name: &str) -> Result<StagedTemplates> {
        self.stage_templates_with("SELECT load_template($1, $2)", release_id, Some(name))
            .await
    }

    async fn stage_configuration(&self, configuration_id: Id) -> Result<StagedConfiguration> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        sqlx::query("SELECT load_configuration($1)")
            .bind(configuration_id)
            .execute(&mut *conn)
            .await
            .context("Staging call 'load_configuration' failed")?;

        let rows = sqlx::query("SELECT id, template_id, kind, name, flag, position FROM tmp_instances")
            .fetch_all(&mut *conn)
            .await
            .context("Failed to read staged instances")?;
        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.get("kind");
            instances.push(InstanceRow {
                id: row.get("id"),
                template_id: row.get("template_id"),
                kind: InstanceRowKind::from_name(&kind)
                    .ok_or_else(|| anyhow!("unknown instance kind '{}'", kind))?,
                name: row.get("name"),
                flag: row.get("flag"),
                position: row.get("position"),
            });
        }
        instances.sort_by_key(|r| (r.kind, r.position));

        let (parameters, values) = read_parameters(&mut *conn).await?;
        let sequence_entries = read_entries(&mut *conn, "tmp_sequence_entries").await?;
        let path_entries = read_entries(&mut *conn, "tmp_path_entries").await?;
        let stream_entries: Vec<StreamEntryRow> = sqlx::query(
            "SELECT stream_id, path_id, position FROM tmp_stream_entries ORDER BY stream_id, position",
        )
        .fetch_all(&mut *conn)
        .await
        .context("Failed to read staged stream entries")?
        .iter()
        .map(|row| StreamEntryRow {
            stream_id: row.get("stream_id"),
            path_id: row.get("path_id"),
            position: row.get("position"),
        })
        .collect();

        Ok(StagedConfiguration {
            instances,
            parameters,
            values,
            sequence_entries,
            path_entries,
            stream_entries,
        })
    }
}

async fn insert_entities(conn: &mut PgConnection, table: &str, rows: &[&EntityRow]) -> Result<()> {
    let columns = match rows.first() {
        Some(EntityRow::EDSource { .. }) | Some(EntityRow::Service { .. }) => "(id, template_id)",
        Some(EntityRow::ESSource { .. }) | Some(EntityRow::ESModule { .. }) | Some(EntityRow::Module { .. }) => {
            "(id, template_id, name)"
        }
        Some(EntityRow::Path { .. }) => "(id, name, end_path)",
        Some(EntityRow::Sequence { .. }) => "(id, name)",
        Some(EntityRow::Stream { .. }) => "(id, label)",
        None => return Ok(()),
    };
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!("INSERT INTO {} {} ", table, columns));
        builder.push_values(chunk, |mut b, row| match row {
            EntityRow::EDSource { id, template_id } | EntityRow::Service { id, template_id } => {
                b.push_bind(*id).push_bind(*template_id);
            }
            EntityRow::ESSource { id, template_id, name }
            | EntityRow::ESModule { id, template_id, name }
            | EntityRow::Module { id, template_id, name } => {
                b.push_bind(*id).push_bind(*template_id).push_bind(name.clone());
            }
            EntityRow::Path { id, name, end_path } => {
                b.push_bind(*id).push_bind(name.clone()).push_bind(*end_path);
            }
            EntityRow::Sequence { id, name } => {
                b.push_bind(*id).push_bind(name.clone());
            }
            EntityRow::Stream { id, label } => {
                b.push_bind(*id).push_bind(label.clone());
            }
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert into {}", table))?;
    }
    Ok(())
}

async fn insert_parameters(conn: &mut PgConnection, table: &str, rows: &[&ParameterInsert]) -> Result<()> {
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} (id, type_id, name, tracked, hex) ", table));
        builder.push_values(chunk, |mut b, p| {
            b.push_bind(p.id)
                .push_bind(p.type_id)
                .push_bind(p.name.clone())
                .push_bind(p.tracked)
                .push_bind(p.hex);
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert into {}", table))?;
    }
    Ok(())
}

async fn insert_values(conn: &mut PgConnection, table: &str, rows: &[&ValueInsert]) -> Result<()> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let vector = first.parameter_type.is_vector();
    let hex = first.parameter_type.has_hex_flag();
    let columns = match (vector, hex) {
        (true, true) => "(parameter_id, position, value, hex)",
        (true, false) => "(parameter_id, position, value)",
        (false, true) => "(parameter_id, value, hex)",
        (false, false) => "(parameter_id, value)",
    };
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!("INSERT INTO {} {} ", table, columns));
        builder.push_values(chunk, |mut b, v| {
            b.push_bind(v.row.parameter_id);
            if vector {
                b.push_bind(v.row.position.unwrap_or(0));
            }
            match &v.row.value {
                StoredValue::Bool(value) => b.push_bind(*value),
                StoredValue::Int(value) => b.push_bind(*value),
                StoredValue::Real(value) => b.push_bind(*value),
                StoredValue::Text(value) => b.push_bind(value.clone()),
            };
            if hex {
                b.push_bind(v.row.hex);
            }
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert into {}", table))?;
    }
    Ok(())
}

async fn insert_edges(conn: &mut PgConnection, table: &str, rows: &[&EdgeRow]) -> Result<()> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let flag = first.kind.has_flag();
    let columns = if flag {
        "(parent_id, child_id, position, flag)"
    } else {
        "(parent_id, child_id, position)"
    };
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!("INSERT INTO {} {} ", table, columns));
        builder.push_values(chunk, |mut b, e| {
            b.push_bind(e.parent_id).push_bind(e.child_id).push_bind(e.position);
            if flag {
                b.push_bind(e.flag);
            }
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert into {}", table))?;
    }
    Ok(())
}

/// Writes one stage: entities, then parameter nodes, values and edges.
async fn write_stage(conn: &mut PgConnection, stage: &WriteStage) -> Result<()> {
    for (table, rows) in stage.entities.iter().into_group_map_by(|e| e.table()).into_iter().sorted_by_key(|(t, _)| *t) {
        insert_entities(conn, table, &rows).await?;
    }
    for (table, rows) in stage.parameters.iter().into_group_map_by(|p| p.table()).into_iter().sorted_by_key(|(t, _)| *t) {
        insert_parameters(conn, table, &rows).await?;
    }
    let values = stage
        .values
        .iter()
        .filter_map(|v| v.parameter_type.value_table().map(|t| (t, v)))
        .into_group_map();
    for (table, rows) in values.into_iter().sorted_by_key(|(t, _)| *t) {
        insert_values(conn, table, &rows).await?;
    }
    // Parameter placements reference nodes of this stage; container edges
    // only reference rows of earlier stages or this one.
    for (table, rows) in stage.edges.iter().into_group_map_by(|e| e.kind.table()).into_iter().sorted_by_key(|(t, _)| *t) {
        insert_edges(conn, table, &rows).await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl WriteStore for PostgresStore {
    async fn commit(&self, batch: &WriteBatch) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let config = &batch.configuration;
        sqlx::query(
            "INSERT INTO configurations \
             (id, release_id, directory_id, name, version, created_at, creator, process_name, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(config.id)
        .bind(config.release_id)
        .bind(config.directory_id)
        .bind(&config.name)
        .bind(config.version)
        .bind(config.created_at)
        .bind(&config.creator)
        .bind(&config.process_name)
        .bind(&config.description)
        .execute(&mut *tx)
        .await
        .context("Failed to insert configuration")?;

        for stage in &batch.stages {
            if stage.is_empty() {
                continue;
            }
            write_stage(&mut *tx, stage)
                .await
                .with_context(|| format!("stage '{}'", stage.name))?;
            log::debug!("Wrote stage '{}' ({} rows)", stage.name, stage.row_count());
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }
}

impl Store for PostgresStore {}
