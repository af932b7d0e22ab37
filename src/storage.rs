use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{AppError, Result};
use crate::research::RelatedResearch;
use crate::summary::SummaryResult;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        summary TEXT NOT NULL,
        keywords TEXT NOT NULL,
        related_research TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_articles (
        user_id TEXT NOT NULL,
        article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
        view_count INTEGER NOT NULL DEFAULT 0,
        last_viewed_at TEXT,
        bookmarked INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, article_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_articles_user ON user_articles (user_id, last_viewed_at)",
];

/// A finished analysis, ready to be stored.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub summary: SummaryResult,
    pub keywords: Vec<String>,
    pub related_research: Option<RelatedResearch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArticle {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub summary: SummaryResult,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_research: Option<RelatedResearch>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub user_id: String,
    pub article_id: i64,
    pub view_count: i64,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub bookmarked: bool,
}

/// An article as it appears on a user's dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserArticle {
    #[serde(flatten)]
    pub article: StoredArticle,
    pub view_count: i64,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub bookmarked: bool,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Inserts or updates the row for `article.url`; never creates a second row for a URL.
    async fn upsert_article(&self, article: &NewArticle) -> Result<StoredArticle>;

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredArticle>>;

    /// Bumps the view count and last-viewed time for the (user, article) pair.
    async fn record_view(&self, user_id: &str, article_id: i64) -> Result<Interaction>;

    async fn set_bookmark(&self, user_id: &str, article_id: i64, bookmarked: bool) -> Result<Interaction>;

    /// Most recently viewed first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserArticle>>;

    async fn article_count(&self) -> Result<i64>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid DATABASE_URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to connect to database: {}", e)))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private database living as long as the store; one connection so every query sees it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::ConfigError(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::StorageError(format!("Failed to run migration {}: {}", i, e)))?;
        }
        Ok(())
    }

    async fn interaction(&self, user_id: &str, article_id: i64) -> Result<Interaction> {
        let row = sqlx::query(
            "SELECT user_id, article_id, view_count, last_viewed_at, bookmarked FROM user_articles WHERE user_id = ? AND article_id = ?",
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Interaction {
            user_id: row.try_get("user_id")?,
            article_id: row.try_get("article_id")?,
            view_count: row.try_get("view_count")?,
            last_viewed_at: parse_optional_time(row.try_get("last_viewed_at")?)?,
            bookmarked: row.try_get("bookmarked")?,
        })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::StorageError(format!("Failed to parse timestamp {:?}: {}", raw, e)))
}

fn parse_optional_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_time).transpose()
}

fn article_from_row(row: &SqliteRow) -> Result<StoredArticle> {
    let summary: String = row.try_get("summary")?;
    let keywords: String = row.try_get("keywords")?;
    let related: Option<String> = row.try_get("related_research")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(StoredArticle {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        summary: serde_json::from_str(&summary)
            .map_err(|e| AppError::StorageError(format!("Corrupt summary column: {}", e)))?,
        keywords: serde_json::from_str(&keywords)
            .map_err(|e| AppError::StorageError(format!("Corrupt keywords column: {}", e)))?,
        related_research: related
            .as_deref()
            .map(serde_json::from_str::<RelatedResearch>)
            .transpose()
            .map_err(|e| AppError::StorageError(format!("Corrupt related_research column: {}", e)))?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AppError::StorageError(format!("Failed to encode column: {}", e)))
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn upsert_article(&self, article: &NewArticle) -> Result<StoredArticle> {
        let timestamp = now();
        let related = article.related_research.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO articles (url, title, summary, keywords, related_research, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                summary = excluded.summary,
                keywords = excluded.keywords,
                related_research = excluded.related_research,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(to_json(&article.summary)?)
        .bind(to_json(&article.keywords)?)
        .bind(related)
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(format!("Failed to store article: {}", e)))?;

        self.find_by_url(&article.url)
            .await?
            .ok_or_else(|| AppError::StorageError(format!("Article {} vanished after upsert", article.url)))
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredArticle>> {
        let row = sqlx::query("SELECT * FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(article_from_row).transpose()
    }

    async fn record_view(&self, user_id: &str, article_id: i64) -> Result<Interaction> {
        sqlx::query(
            r#"
            INSERT INTO user_articles (user_id, article_id, view_count, last_viewed_at, bookmarked)
            VALUES (?, ?, 1, ?, 0)
            ON CONFLICT(user_id, article_id) DO UPDATE SET
                view_count = user_articles.view_count + 1,
                last_viewed_at = excluded.last_viewed_at
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(format!("Failed to record view: {}", e)))?;

        self.interaction(user_id, article_id).await
    }

    async fn set_bookmark(&self, user_id: &str, article_id: i64, bookmarked: bool) -> Result<Interaction> {
        sqlx::query(
            r#"
            INSERT INTO user_articles (user_id, article_id, view_count, last_viewed_at, bookmarked)
            VALUES (?, ?, 0, NULL, ?)
            ON CONFLICT(user_id, article_id) DO UPDATE SET bookmarked = excluded.bookmarked
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(bookmarked)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(format!("Failed to update bookmark: {}", e)))?;

        self.interaction(user_id, article_id).await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserArticle>> {
        let rows = sqlx::query(
            r#"
            SELECT a.*, ua.view_count, ua.last_viewed_at, ua.bookmarked
            FROM user_articles ua
            JOIN articles a ON a.id = ua.article_id
            WHERE ua.user_id = ?
            ORDER BY ua.last_viewed_at DESC, a.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<UserArticle> {
                Ok(UserArticle {
                    article: article_from_row(row)?,
                    view_count: row.try_get("view_count")?,
                    last_viewed_at: parse_optional_time(row.try_get("last_viewed_at")?)?,
                    bookmarked: row.try_get("bookmarked")?,
                })
            })
            .collect()
    }

    async fn article_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_summary;
    use std::time::Duration;

    fn new_article(url: &str, title: &str) -> NewArticle {
        NewArticle {
            url: url.to_string(),
            title: title.to_string(),
            summary: sample_summary(title),
            keywords: vec!["k".to_string()],
            related_research: None,
        }
    }

    #[tokio::test]
    async fn upsert_by_url_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = store.upsert_article(&new_article("https://x.com/a", "A")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.upsert_article(&new_article("https://x.com/a", "A")).await.unwrap();

        assert_eq!(store.article_count().await.unwrap(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn views_and_bookmarks_accumulate_per_user() {
        let store = SqliteStore::in_memory().await.unwrap();
        let article = store.upsert_article(&new_article("https://x.com/a", "A")).await.unwrap();

        let bookmarked = store.set_bookmark("u1", article.id, true).await.unwrap();
        assert_eq!(bookmarked.view_count, 0);
        assert!(bookmarked.last_viewed_at.is_none());

        store.record_view("u1", article.id).await.unwrap();
        let second = store.record_view("u1", article.id).await.unwrap();
        assert_eq!(second.view_count, 2);
        assert!(second.bookmarked);
        assert!(second.last_viewed_at.is_some());

        let other = store.record_view("u2", article.id).await.unwrap();
        assert_eq!(other.view_count, 1);
        assert!(!other.bookmarked);
    }

    #[tokio::test]
    async fn lists_user_articles_most_recent_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.upsert_article(&new_article("https://x.com/a", "A")).await.unwrap();
        let b = store.upsert_article(&new_article("https://x.com/b", "B")).await.unwrap();

        store.record_view("u1", a.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.record_view("u1", b.id).await.unwrap();

        let listed = store.list_for_user("u1").await.unwrap();
        let titles: Vec<_> = listed.iter().map(|u| u.article.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
        assert_eq!(listed[0].article.summary.title, "B");
        assert!(store.list_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_url_is_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.find_by_url("https://nope.example").await.unwrap().is_none());
    }
}
