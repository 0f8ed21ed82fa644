//! Site lookups. Sites are collaborator data: the decision flows only
//! read them. The insert exists for operator tooling.

use uuid::Uuid;

use crate::error::Result;
use crate::model::{NewSite, Site};

impl super::Db {
    /// Look up a site by id.
    pub async fn find_site(&self, id: Uuid) -> Result<Option<Site>> {
        let row: Option<SiteRow> = sqlx::query_as(
            "SELECT id, name, latitude, longitude, radius_meters, strict_out_of_range
             FROM sites WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SiteRow::into_site))
    }

    /// All sites, ordered by name.
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let rows: Vec<SiteRow> = sqlx::query_as(
            "SELECT id, name, latitude, longitude, radius_meters, strict_out_of_range
             FROM sites ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SiteRow::into_site).collect())
    }

    /// Provision a site (dev/operator use).
    pub async fn create_site(&self, new: NewSite) -> Result<Site> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO sites (id, name, latitude, longitude, radius_meters, strict_out_of_range)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(&new.name)
        .bind(new.latitude)
        .bind(new.longitude)
        .bind(new.radius_meters)
        .bind(new.strict_out_of_range)
        .execute(&self.pool)
        .await?;

        Ok(Site {
            id,
            name: new.name,
            latitude: new.latitude,
            longitude: new.longitude,
            radius_meters: new.radius_meters,
            strict_out_of_range: new.strict_out_of_range,
        })
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct SiteRow {
    id: Uuid,
    name: String,
    latitude: f64,
    longitude: f64,
    radius_meters: f64,
    strict_out_of_range: bool,
}

impl SiteRow {
    fn into_site(self) -> Site {
        Site {
            id: self.id,
            name: self.name,
            latitude: self.latitude,
            longitude: self.longitude,
            radius_meters: self.radius_meters,
            strict_out_of_range: self.strict_out_of_range,
        }
    }
}
