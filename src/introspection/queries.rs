//! Catalog statements. Every identifier is a bind parameter; every column is
//! cast to a type the result decoder maps directly.
//!
//! Listings end in `LIMIT ALL` so the row cap never cuts them short.

pub const LIST_TABLES: &str = r#"
SELECT t.table_name::text AS table_name,
       t.table_type::text AS table_type,
       (SELECT count(*)
          FROM information_schema.columns c
         WHERE c.table_schema = t.table_schema
           AND c.table_name = t.table_name) AS column_count
  FROM information_schema.tables t
 WHERE t.table_schema = $1
 ORDER BY t.table_name
 LIMIT ALL"#;

pub const DESCRIBE_COLUMNS: &str = r#"
SELECT c.column_name::text AS column_name,
       c.data_type::text AS data_type,
       (c.is_nullable = 'YES') AS nullable,
       c.column_default::text AS column_default,
       c.character_maximum_length::int4 AS max_length,
       c.ordinal_position::int4 AS ordinal_position
  FROM information_schema.columns c
 WHERE c.table_schema = $1
   AND c.table_name = $2
 ORDER BY c.ordinal_position
 LIMIT ALL"#;

pub const DESCRIBE_CONSTRAINTS: &str = r#"
SELECT con.conname::text AS constraint_name,
       CASE con.contype
            WHEN 'p' THEN 'PRIMARY KEY'
            WHEN 'f' THEN 'FOREIGN KEY'
            WHEN 'u' THEN 'UNIQUE'
            WHEN 'c' THEN 'CHECK'
            WHEN 'x' THEN 'EXCLUDE'
            WHEN 'n' THEN 'NOT NULL'
            ELSE con.contype::text
       END AS constraint_type,
       COALESCE(
           (SELECT array_agg(a.attname::text ORDER BY k.ord)
              FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
              JOIN pg_attribute a
                ON a.attrelid = con.conrelid
               AND a.attnum = k.attnum),
           ARRAY[]::text[]) AS columns,
       CASE WHEN con.confrelid <> 0 THEN con.confrelid::regclass::text END AS referenced_table,
       pg_get_constraintdef(con.oid) AS definition
  FROM pg_constraint con
  JOIN pg_class rel ON rel.oid = con.conrelid
  JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace
 WHERE nsp.nspname = $1
   AND rel.relname = $2
 ORDER BY con.contype, con.conname
 LIMIT ALL"#;

pub const TABLE_STATS: &str = r#"
SELECT c.reltuples::int8 AS row_estimate,
       s.n_live_tup AS live_tuples,
       s.n_dead_tup AS dead_tuples,
       pg_total_relation_size(c.oid) AS total_bytes,
       pg_relation_size(c.oid) AS table_bytes,
       pg_indexes_size(c.oid) AS index_bytes,
       COALESCE(pg_total_relation_size(NULLIF(c.reltoastrelid, 0)), 0)::int8 AS toast_bytes,
       pg_size_pretty(pg_total_relation_size(c.oid)) AS total_size,
       s.last_vacuum,
       s.last_autovacuum,
       s.last_analyze,
       s.last_autoanalyze
  FROM pg_class c
  JOIN pg_namespace n ON n.oid = c.relnamespace
  LEFT JOIN pg_stat_all_tables s ON s.relid = c.oid
 WHERE n.nspname = $1
   AND c.relname = $2
   AND c.relkind IN ('r', 'p', 'm')"#;

pub const LIST_INDEXES: &str = r#"
SELECT i.tablename::text AS table_name,
       i.indexname::text AS index_name,
       i.indexdef AS definition,
       ix.indisunique AS is_unique,
       ix.indisprimary AS is_primary,
       pg_relation_size(ic.oid) AS size_bytes
  FROM pg_indexes i
  JOIN pg_namespace n ON n.nspname = i.schemaname
  JOIN pg_class ic ON ic.relname = i.indexname AND ic.relnamespace = n.oid
  JOIN pg_index ix ON ix.indexrelid = ic.oid
 WHERE i.schemaname = $1
   AND ($2::text IS NULL OR i.tablename = $2::text)
 ORDER BY i.tablename, i.indexname
 LIMIT ALL"#;

pub const LIST_SCHEMAS: &str = r#"
SELECT n.nspname::text AS schema_name,
       pg_get_userbyid(n.nspowner)::text AS owner,
       (SELECT count(*)
          FROM pg_class c
         WHERE c.relnamespace = n.oid
           AND c.relkind IN ('r', 'p')) AS table_count
  FROM pg_namespace n
 WHERE $1::bool
    OR (n.nspname NOT LIKE 'pg\_%' AND n.nspname <> 'information_schema')
 ORDER BY n.nspname
 LIMIT ALL"#;
