use crate::domain::{ExternalId, ItemKind};
use crate::entities::{prelude::*, series, shows, subtitles, video_files};
use crate::library::LibraryError;
use crate::models::{CommonData, EpisodeData, Show, Subtitle, VideoFile};
use chrono::NaiveDate;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use std::time::Duration;

/// Row-level access to the four media tables.
///
/// Works on plain model values; sharing and identity are the caller's concern.
pub struct MediaRepository {
    conn: DatabaseConnection,
}

fn external_id(raw: i64) -> Result<ExternalId, LibraryError> {
    u32::try_from(raw)
        .ok()
        .and_then(ExternalId::new)
        .ok_or_else(|| LibraryError::InvalidRecord(format!("bad external id {raw}")))
}

fn to_u32(raw: Option<i32>, field: &str) -> Result<u32, LibraryError> {
    u32::try_from(raw.unwrap_or_default())
        .map_err(|_| LibraryError::InvalidRecord(format!("negative {field}")))
}

struct CommonColumns {
    title: String,
    year: i32,
    other_titles: String,
    duration_secs: i64,
    plot: String,
    plot_medium: String,
    plot_long: String,
    poster_url: String,
    rating: f32,
    votes: i64,
    languages: String,
}

impl CommonColumns {
    fn from_common(common: &CommonData) -> Result<Self, LibraryError> {
        Ok(Self {
            title: common.title.clone(),
            year: common.year,
            other_titles: serde_json::to_string(&common.other_titles)?,
            duration_secs: i64::try_from(common.duration.as_secs()).unwrap_or(i64::MAX),
            plot: common.plot.clone(),
            plot_medium: common.plot_medium.clone(),
            plot_long: common.plot_long.clone(),
            poster_url: common.poster_url.clone(),
            rating: common.rating,
            votes: i64::from(common.votes),
            languages: serde_json::to_string(&common.languages)?,
        })
    }

    fn into_common(self, id: ExternalId) -> Result<CommonData, LibraryError> {
        Ok(CommonData {
            external_id: id,
            title: self.title,
            year: self.year,
            other_titles: serde_json::from_str(&self.other_titles)?,
            duration: Duration::from_secs(u64::try_from(self.duration_secs).unwrap_or_default()),
            plot: self.plot,
            plot_medium: self.plot_medium,
            plot_long: self.plot_long,
            poster_url: self.poster_url,
            rating: self.rating,
            votes: u32::try_from(self.votes).unwrap_or_default(),
            languages: serde_json::from_str(&self.languages)?,
        })
    }
}

impl MediaRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn find_file(&self, path: &str) -> Result<Option<VideoFile>, LibraryError> {
        let Some(model) = VideoFiles::find_by_id(path.to_string())
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(VideoFile {
            path: model.path,
            size: model.size.cast_unsigned(),
            fingerprint: model.fingerprint.cast_unsigned(),
            show_id: model.show_id.map(external_id).transpose()?,
            status: serde_json::from_str(&model.status)?,
            subtitles: Vec::new(),
        }))
    }

    pub async fn file_paths_for_show(&self, id: ExternalId) -> Result<Vec<String>, LibraryError> {
        let rows = VideoFiles::find()
            .filter(video_files::Column::ShowId.eq(i64::from(id.value())))
            .order_by_asc(video_files::Column::Path)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(|r| r.path).collect())
    }

    pub async fn upsert_file(&self, file: &VideoFile) -> Result<(), LibraryError> {
        let active_model = video_files::ActiveModel {
            path: Set(file.path.clone()),
            size: Set(file.size.cast_signed()),
            fingerprint: Set(file.fingerprint.cast_signed()),
            show_id: Set(file.show_id.map(|id| i64::from(id.value()))),
            status: Set(serde_json::to_string(&file.status)?),
        };

        VideoFiles::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(video_files::Column::Path)
                    .update_columns([
                        video_files::Column::Size,
                        video_files::Column::Fingerprint,
                        video_files::Column::ShowId,
                        video_files::Column::Status,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn find_show(&self, id: ExternalId) -> Result<Option<Show>, LibraryError> {
        let Some(model) = Shows::find_by_id(i64::from(id.value()))
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };

        let kind = match model.kind.as_str() {
            "series" => ItemKind::Series,
            "episode" => ItemKind::Episode,
            _ => ItemKind::Movie,
        };

        let episode = if kind == ItemKind::Episode || model.series_id.is_some() {
            Some(EpisodeData {
                season: to_u32(model.season, "season")?,
                episode: to_u32(model.episode, "episode")?,
                series_id: model.series_id.map(external_id).transpose()?,
            })
        } else {
            None
        };

        let release_date = model
            .release_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

        let common = CommonColumns {
            title: model.title,
            year: model.year,
            other_titles: model.other_titles,
            duration_secs: model.duration_secs,
            plot: model.plot,
            plot_medium: model.plot_medium,
            plot_long: model.plot_long,
            poster_url: model.poster_url,
            rating: model.rating,
            votes: model.votes,
            languages: model.languages,
        }
        .into_common(id)?;

        let mut show = Show::new(id);
        show.common = common;
        show.kind = kind;
        show.release_date = release_date;
        show.tagline = model.tagline;
        show.episode = episode;
        show.status = serde_json::from_str(&model.status)?;
        Ok(Some(show))
    }

    pub async fn episode_ids_for_series(
        &self,
        id: ExternalId,
    ) -> Result<Vec<ExternalId>, LibraryError> {
        let rows = Shows::find()
            .filter(shows::Column::SeriesId.eq(i64::from(id.value())))
            .order_by_asc(shows::Column::Season)
            .order_by_asc(shows::Column::Episode)
            .all(&self.conn)
            .await?;
        rows.into_iter().map(|r| external_id(r.external_id)).collect()
    }

    pub async fn upsert_show(&self, show: &Show) -> Result<(), LibraryError> {
        let common = CommonColumns::from_common(&show.common)?;
        let episode = show.episode.as_ref();

        let active_model = shows::ActiveModel {
            external_id: Set(i64::from(show.external_id().value())),
            kind: Set(show.kind.as_str().to_string()),
            title: Set(common.title),
            year: Set(common.year),
            other_titles: Set(common.other_titles),
            duration_secs: Set(common.duration_secs),
            plot: Set(common.plot),
            plot_medium: Set(common.plot_medium),
            plot_long: Set(common.plot_long),
            poster_url: Set(common.poster_url),
            rating: Set(common.rating),
            votes: Set(common.votes),
            languages: Set(common.languages),
            release_date: Set(show.release_date.map(|d| d.format("%Y-%m-%d").to_string())),
            tagline: Set(show.tagline.clone()),
            season: Set(episode.and_then(|e| i32::try_from(e.season).ok())),
            episode: Set(episode.and_then(|e| i32::try_from(e.episode).ok())),
            series_id: Set(episode
                .and_then(|e| e.series_id)
                .map(|id| i64::from(id.value()))),
            status: Set(serde_json::to_string(&show.status)?),
        };

        Shows::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(shows::Column::ExternalId)
                    .update_columns([
                        shows::Column::Kind,
                        shows::Column::Title,
                        shows::Column::Year,
                        shows::Column::OtherTitles,
                        shows::Column::DurationSecs,
                        shows::Column::Plot,
                        shows::Column::PlotMedium,
                        shows::Column::PlotLong,
                        shows::Column::PosterUrl,
                        shows::Column::Rating,
                        shows::Column::Votes,
                        shows::Column::Languages,
                        shows::Column::ReleaseDate,
                        shows::Column::Tagline,
                        shows::Column::Season,
                        shows::Column::Episode,
                        shows::Column::SeriesId,
                        shows::Column::Status,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn find_series(
        &self,
        id: ExternalId,
    ) -> Result<Option<crate::models::Series>, LibraryError> {
        let Some(model) = series::Entity::find_by_id(i64::from(id.value()))
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };

        let common = CommonColumns {
            title: model.title,
            year: model.year,
            other_titles: model.other_titles,
            duration_secs: model.duration_secs,
            plot: model.plot,
            plot_medium: model.plot_medium,
            plot_long: model.plot_long,
            poster_url: model.poster_url,
            rating: model.rating,
            votes: model.votes,
            languages: model.languages,
        }
        .into_common(id)?;

        let mut found = crate::models::Series::new(id);
        found.common = common;
        found.status = serde_json::from_str(&model.status)?;
        Ok(Some(found))
    }

    pub async fn upsert_series(&self, record: &crate::models::Series) -> Result<(), LibraryError> {
        let common = CommonColumns::from_common(&record.common)?;

        let active_model = series::ActiveModel {
            external_id: Set(i64::from(record.external_id().value())),
            title: Set(common.title),
            year: Set(common.year),
            other_titles: Set(common.other_titles),
            duration_secs: Set(common.duration_secs),
            plot: Set(common.plot),
            plot_medium: Set(common.plot_medium),
            plot_long: Set(common.plot_long),
            poster_url: Set(common.poster_url),
            rating: Set(common.rating),
            votes: Set(common.votes),
            languages: Set(common.languages),
            status: Set(serde_json::to_string(&record.status)?),
        };

        series::Entity::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(series::Column::ExternalId)
                    .update_columns([
                        series::Column::Title,
                        series::Column::Year,
                        series::Column::OtherTitles,
                        series::Column::DurationSecs,
                        series::Column::Plot,
                        series::Column::PlotMedium,
                        series::Column::PlotLong,
                        series::Column::PosterUrl,
                        series::Column::Rating,
                        series::Column::Votes,
                        series::Column::Languages,
                        series::Column::Status,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn subtitles_for_file(&self, path: &str) -> Result<Vec<Subtitle>, LibraryError> {
        let rows = Subtitles::find()
            .filter(subtitles::Column::VideoFile.eq(path))
            .order_by_asc(subtitles::Column::Filename)
            .all(&self.conn)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Subtitle {
                    language: row
                        .language
                        .parse()
                        .map_err(|e| LibraryError::InvalidRecord(format!("{e}")))?,
                    filename: row.filename,
                    hash: row.hash,
                    hearing_impaired: row.hearing_impaired,
                    score: row.score.cast_unsigned(),
                    format: row.format,
                    video_file: row.video_file,
                })
            })
            .collect()
    }

    pub async fn upsert_subtitle(&self, subtitle: &Subtitle) -> Result<(), LibraryError> {
        let active_model = subtitles::ActiveModel {
            filename: Set(subtitle.filename.clone()),
            hash: Set(subtitle.hash.clone()),
            language: Set(subtitle.language.iso1().to_string()),
            hearing_impaired: Set(subtitle.hearing_impaired),
            score: Set(subtitle.score.cast_signed()),
            format: Set(subtitle.format.clone()),
            video_file: Set(subtitle.video_file.clone()),
        };

        Subtitles::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(subtitles::Column::Filename)
                    .update_columns([
                        subtitles::Column::Hash,
                        subtitles::Column::Language,
                        subtitles::Column::HearingImpaired,
                        subtitles::Column::Score,
                        subtitles::Column::Format,
                        subtitles::Column::VideoFile,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }
}
