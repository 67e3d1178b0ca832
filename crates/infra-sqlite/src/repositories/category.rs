// Category Repository (read-through cached)

use crate::error::StorageError;
use crate::storage::Storage;
use iptv_core::application::BoundedCache;
use iptv_core::domain::Category;
use std::sync::Arc;
use tracing::debug;

const ENABLED_KEY: &str = "category:enabled";
const CACHE_PREFIX: &str = "category:";

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: i64,
    name: String,
    psw: String,
    #[sqlx(rename = "type")]
    category_type: String,
    enable: Option<i64>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            name: row.name,
            psw: row.psw,
            category_type: row.category_type,
            enable: row.enable.unwrap_or(1) != 0,
        }
    }
}

#[derive(Clone)]
pub struct CategoryRepository {
    storage: Storage,
    cache: Arc<BoundedCache<Vec<Category>>>,
}

impl CategoryRepository {
    pub fn new(storage: Storage, cache: Arc<BoundedCache<Vec<Category>>>) -> Self {
        Self { storage, cache }
    }

    /// Enabled categories in id order, served from cache when fresh
    pub async fn enabled(&self) -> Result<Vec<Category>, StorageError> {
        self.cache
            .get_or_try_insert_with(ENABLED_KEY, || async {
                debug!("Loading enabled categories from store");
                let rows: Vec<CategoryRow> = self
                    .storage
                    .fetch_as(
                        "SELECT id, name, psw, type, enable FROM iptv_category \
                         WHERE enable = 1 ORDER BY id",
                        &[],
                    )
                    .await?;
                Ok::<_, StorageError>(rows.into_iter().map(Category::from).collect())
            })
            .await
    }

    pub async fn insert(
        &self,
        name: &str,
        psw: &str,
        category_type: &str,
        enable: bool,
    ) -> Result<(), StorageError> {
        self.storage
            .execute(
                "INSERT INTO iptv_category (name, psw, type, enable) VALUES (?, ?, ?, ?)",
                &[name.into(), psw.into(), category_type.into(), enable.into()],
                false,
            )
            .await?;
        self.cache.invalidate(Some(CACHE_PREFIX));
        Ok(())
    }

    pub async fn set_enabled(&self, id: i64, enable: bool) -> Result<u64, StorageError> {
        let changed = self
            .storage
            .execute_affected(
                "UPDATE iptv_category SET enable = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                &[enable.into(), id.into()],
            )
            .await?;
        self.cache.invalidate(Some(CACHE_PREFIX));
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_enabled_is_cached_until_invalidated() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(PoolConfig::new(dir.path().join("cat.db")).with_size(1))
            .await
            .unwrap();
        let cache = Arc::new(BoundedCache::new(16, Duration::from_secs(300)));
        let repo = CategoryRepository::new(storage.clone(), cache.clone());

        repo.insert("央视频道", "cctv", "央视", true).await.unwrap();
        repo.insert("隐藏", "hidden", "其他", false).await.unwrap();

        let first = repo.enabled().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "央视频道");
        assert_eq!(cache.len(), 1);

        // A write behind the repository's back is not visible while cached
        storage
            .execute("UPDATE iptv_category SET enable = 1", &[], false)
            .await
            .unwrap();
        assert_eq!(repo.enabled().await.unwrap().len(), 1);

        // Going through the repository invalidates
        repo.set_enabled(first[0].id, true).await.unwrap();
        assert_eq!(repo.enabled().await.unwrap().len(), 2);
    }
}
