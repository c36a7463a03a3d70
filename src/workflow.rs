use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::acquire::{AcquiredMedia, Acquirer, WorkItem, YtDlp};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::history::HistoryStore;
use crate::media::{Encoder, EncoderFactory};
use crate::publish::{CommandPublisher, DryRunPublisher, PublishRequest, Publisher};
use crate::render::BilingualRenderer;
use crate::subtitle::{
    BilingualLine, MergeEngine, SubtitleTrack, TimelineNormalizer, read_srt, to_bilingual_srt, write_srt,
};
use crate::translate::{BatchTranslator, TranslationService, TranslationServiceFactory};

/// Position of a job in the pipeline. Strictly forward; `Completed` and
/// `Failed` absorb every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Created,
    Downloading,
    Translating,
    Rendering,
    Publishing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// The current stage finished successfully.
    Advance,
    /// The current stage returned an error.
    Fail,
}

impl Stage {
    pub fn transition(self, event: StageEvent) -> Stage {
        match (self, event) {
            (Stage::Completed, _) => Stage::Completed,
            (Stage::Failed, _) => Stage::Failed,
            (_, StageEvent::Fail) => Stage::Failed,
            (Stage::Created, StageEvent::Advance) => Stage::Downloading,
            (Stage::Downloading, StageEvent::Advance) => Stage::Translating,
            (Stage::Translating, StageEvent::Advance) => Stage::Rendering,
            (Stage::Rendering, StageEvent::Advance) => Stage::Publishing,
            (Stage::Publishing, StageEvent::Advance) => Stage::Completed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Created => "created",
            Stage::Downloading => "downloading",
            Stage::Translating => "translating",
            Stage::Rendering => "rendering",
            Stage::Publishing => "publishing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        published_id: String,
        /// False when the history write failed after a successful publish
        history_committed: bool,
    },
    Failed {
        stage: Stage,
        error: RelayError,
    },
}

/// One execution of the pipeline for one item.
#[derive(Debug)]
pub struct WorkflowJob {
    pub id: Uuid,
    pub item: WorkItem,
    pub folder: PathBuf,
    pub stage: Stage,
    pub outcome: Option<JobOutcome>,
}

impl WorkflowJob {
    pub fn new(item: WorkItem, folder: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            item,
            folder,
            stage: Stage::Created,
            outcome: None,
        }
    }

    fn advance(&mut self) {
        self.stage = self.stage.transition(StageEvent::Advance);
        info!("Job {} [{}]: {}", self.id, self.item.id, self.stage);
    }

    fn fail(&mut self, error: RelayError) {
        let stage = self.stage;
        self.stage = self.stage.transition(StageEvent::Fail);
        error!("Job {} [{}] failed while {}: {}", self.id, self.item.id, stage, error);
        self.outcome = Some(JobOutcome::Failed { stage, error });
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(JobOutcome::Completed { .. }))
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.outcome {
            Some(JobOutcome::Failed { stage, .. }) => Some(*stage),
            _ => None,
        }
    }
}

/// Runs a single item to a terminal state.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, item: &WorkItem) -> WorkflowJob;
}

/// Subtitle artifacts produced for one source track.
#[derive(Debug, Clone)]
pub struct TranslatedSubtitles {
    pub stem: String,
    pub track: SubtitleTrack,
    pub lines: Vec<BilingualLine>,
    pub normalized_srt: PathBuf,
    pub bilingual_srt: PathBuf,
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string())
}

/// Folder-safe form of an item identifier.
fn folder_name(item_id: &str) -> String {
    item_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub struct Workflow {
    config: Config,
    acquirer: Box<dyn Acquirer>,
    translator: BatchTranslator,
    encoder: Box<dyn Encoder>,
    publisher: Box<dyn Publisher>,
    history: Arc<dyn HistoryStore>,
    normalizer: TimelineNormalizer,
    merger: MergeEngine,
    renderer: BilingualRenderer,
}

impl Workflow {
    pub fn new(
        config: Config,
        acquirer: Box<dyn Acquirer>,
        service: Box<dyn TranslationService>,
        encoder: Box<dyn Encoder>,
        publisher: Box<dyn Publisher>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<Self> {
        config.validate()?;
        let normalizer = TimelineNormalizer::new(config.subtitle.fps)?;
        let merger = MergeEngine::new(config.subtitle.merge_unit, config.subtitle.merge_budget);
        let translator = BatchTranslator::new(service, &config.translate);
        let renderer = BilingualRenderer::new(config.render.clone());

        Ok(Self {
            config,
            acquirer,
            translator,
            encoder,
            publisher,
            history,
            normalizer,
            merger,
            renderer,
        })
    }

    /// Wire the process-backed collaborators from configuration. With
    /// `dry_run` the finished video is logged instead of uploaded.
    pub fn from_config(config: Config, history: Arc<dyn HistoryStore>, dry_run: bool) -> Result<Self> {
        let acquirer = Box::new(YtDlp::new(config.acquire.clone()));
        let service = TranslationServiceFactory::create_service(&config.translate)?;
        let encoder = EncoderFactory::create_encoder(config.media.clone());
        let publisher: Box<dyn Publisher> = if dry_run {
            Box::new(DryRunPublisher)
        } else {
            Box::new(CommandPublisher::new(config.publish.clone())?)
        };
        Self::new(config, acquirer, service, encoder, publisher, history)
    }

    /// Timeline repair, merge and translation of one SRT file. Writes
    /// `<stem>_fix.srt` and `<stem>_bilingual.srt` into `output_dir`.
    pub async fn translate_subtitles(&self, srt_path: &Path, output_dir: &Path) -> Result<TranslatedSubtitles> {
        let stem = file_stem(srt_path)
            .trim_end_matches(&format!(".{}", self.config.acquire.subtitle_language))
            .to_string();
        fs::create_dir_all(output_dir).await?;

        let source = read_srt(srt_path).await?;
        if source.is_empty() {
            return Err(RelayError::Validation(format!(
                "{} contains no subtitle entries",
                srt_path.display()
            )));
        }

        let normalized = self.normalizer.normalize(&source)?;
        let normalized_srt = output_dir.join(format!("{}_fix.srt", stem));
        write_srt(&normalized, &normalized_srt).await?;

        let track = self.merger.merge(&normalized);
        info!("Prepared {} display units from {} entries", track.len(), source.len());

        let lines = self.translator.translate(&track).await?;
        let bilingual_srt = output_dir.join(format!("{}_bilingual.srt", stem));
        fs::write(&bilingual_srt, to_bilingual_srt(&track, &lines)?).await?;

        Ok(TranslatedSubtitles {
            stem,
            track,
            lines,
            normalized_srt,
            bilingual_srt,
        })
    }

    /// Write `<stem>_bilingual.ass` next to the other artifacts.
    pub async fn render_subtitles(&self, subtitles: &TranslatedSubtitles, output_dir: &Path) -> Result<PathBuf> {
        let ass_path = output_dir.join(format!("{}_bilingual.ass", subtitles.stem));
        self.renderer.write(&subtitles.track, &subtitles.lines, &ass_path).await?;
        Ok(ass_path)
    }

    async fn download(&self, job: &WorkflowJob) -> Result<(AcquiredMedia, PathBuf)> {
        let acquired = self
            .acquirer
            .acquire(&job.item.id, &self.config.acquire.quality, &job.folder)
            .await?;

        let subtitle_path = acquired.subtitle_path.clone().ok_or_else(|| {
            RelayError::Validation(format!("{} has no {} subtitle track", job.item.id, self.config.acquire.subtitle_language))
        })?;
        Ok((acquired, subtitle_path))
    }

    async fn render(&self, job: &WorkflowJob, acquired: &AcquiredMedia, subtitles: &TranslatedSubtitles) -> Result<PathBuf> {
        let ass_path = self.render_subtitles(subtitles, &job.folder).await?;
        let output = job.folder.join(format!("{}_bilingual.mp4", file_stem(&acquired.media_path)));
        self.encoder.embed(&acquired.media_path, &ass_path, &output).await
    }

    async fn publish(&self, job: &WorkflowJob, acquired: &AcquiredMedia, video: &Path) -> Result<String> {
        let mut metadata = acquired.metadata.clone();
        if metadata.title.trim().is_empty() {
            metadata.title = job.item.title.clone();
        }
        if metadata.uploader_name().is_empty() {
            metadata.uploader = job.item.channel.clone();
        }

        let request = PublishRequest::prepare(video, &metadata, acquired.thumbnail_path.clone());
        self.publisher.publish(&request).await
    }

    async fn execute(&self, job: &mut WorkflowJob) -> Result<String> {
        job.advance();
        let (acquired, subtitle_path) = self.download(job).await?;

        job.advance();
        let subtitles = self.translate_subtitles(&subtitle_path, &job.folder).await?;

        job.advance();
        let video = self.render(job, &acquired, &subtitles).await?;

        job.advance();
        self.publish(job, &acquired, &video).await
    }

    /// Drive one item through every stage. History is written only when the
    /// job completes.
    pub async fn run_job(&self, item: &WorkItem) -> WorkflowJob {
        let folder = self.config.acquire.download_dir.join(folder_name(&item.id));
        let mut job = WorkflowJob::new(item.clone(), folder);
        info!("Job {} started for {} ({})", job.id, item.id, item.title);

        match self.execute(&mut job).await {
            Ok(published_id) => {
                job.advance();
                let history_committed = match self.history.record(&item.id).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Job {} completed but history was not updated: {}", job.id, e);
                        false
                    }
                };
                job.outcome = Some(JobOutcome::Completed {
                    published_id,
                    history_committed,
                });
            }
            Err(e) => {
                if e.is_transport() {
                    warn!("Job {} hit an external service failure", job.id);
                }
                job.fail(e);
            }
        }

        job
    }
}

#[async_trait]
impl JobRunner for Workflow {
    async fn run(&self, item: &WorkItem) -> WorkflowJob {
        self.run_job(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::ItemMetadata;
    use crate::history::testing::MemoryHistoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SOURCE_SRT: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello there\n\n2\n00:00:02,400 --> 00:00:04,000\nhow are you\n\n3\n00:00:05,000 --> 00:00:06,000\nthis line is long enough that it cannot merge with anything nearby at all\n\n";

    struct FakeAcquirer {
        with_subtitles: bool,
    }

    #[async_trait]
    impl Acquirer for FakeAcquirer {
        async fn acquire(&self, item_id: &str, _quality: &str, folder: &Path) -> Result<AcquiredMedia> {
            fs::create_dir_all(folder).await?;
            let media_path = folder.join(format!("{}.mp4", item_id));
            fs::write(&media_path, b"video").await?;

            let subtitle_path = if self.with_subtitles {
                let path = folder.join(format!("{}.en.srt", item_id));
                fs::write(&path, SOURCE_SRT).await?;
                Some(path)
            } else {
                None
            };

            Ok(AcquiredMedia {
                media_path,
                subtitle_path,
                thumbnail_path: None,
                metadata: ItemMetadata {
                    title: "A talk".to_string(),
                    uploader: "Speaker".to_string(),
                    ..ItemMetadata::default()
                },
            })
        }
    }

    /// Answers every numbered line with an echo and a prefixed translation.
    struct EchoService;

    #[async_trait]
    impl TranslationService for EchoService {
        async fn complete(&self, _system_prompt: &str, body: &str) -> Result<String> {
            Ok(body
                .lines()
                .filter_map(|line| line.split_once(": "))
                .map(|(index, text)| format!("{index}: {text}\n{index}: 译{text}"))
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    struct FakeEncoder {
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn embed(&self, media_path: &Path, subtitle_path: &Path, output_path: &Path) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RelayError::Encoding("encoder crashed".to_string()));
            }
            assert!(subtitle_path.exists());
            fs::copy(media_path, output_path).await?;
            Ok(output_path.to_path_buf())
        }

        async fn check_availability(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakePublisher {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, request: &PublishRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.title, "A talk | Speaker");
            Ok("BV1234567890".to_string())
        }
    }

    struct Harness {
        workflow: Workflow,
        history: Arc<MemoryHistoryStore>,
        encodes: Arc<AtomicUsize>,
        publishes: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    fn harness(with_subtitles: bool, encoder_fails: bool, history: MemoryHistoryStore) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let mut config = Config::default();
        config.acquire.download_dir = root.clone();

        let history = Arc::new(history);
        let encodes = Arc::new(AtomicUsize::new(0));
        let publishes = Arc::new(AtomicUsize::new(0));

        let workflow = Workflow::new(
            config,
            Box::new(FakeAcquirer { with_subtitles }),
            Box::new(EchoService),
            Box::new(FakeEncoder { fail: encoder_fails, calls: encodes.clone() }),
            Box::new(FakePublisher { calls: publishes.clone() }),
            history.clone(),
        )
        .unwrap();

        Harness { workflow, history, encodes, publishes, _dir: dir, root }
    }

    #[test]
    fn test_transition_function() {
        let forward = [
            Stage::Created,
            Stage::Downloading,
            Stage::Translating,
            Stage::Rendering,
            Stage::Publishing,
            Stage::Completed,
        ];
        for pair in forward.windows(2) {
            assert_eq!(pair[0].transition(StageEvent::Advance), pair[1]);
        }
        for stage in &forward[..5] {
            assert_eq!(stage.transition(StageEvent::Fail), Stage::Failed);
            assert!(!stage.is_terminal());
        }
        for event in [StageEvent::Advance, StageEvent::Fail] {
            assert_eq!(Stage::Completed.transition(event), Stage::Completed);
            assert_eq!(Stage::Failed.transition(event), Stage::Failed);
        }
    }

    #[tokio::test]
    async fn test_successful_job_commits_history() {
        let h = harness(true, false, MemoryHistoryStore::default());
        let job = h.workflow.run_job(&WorkItem::new("abc")).await;

        assert_eq!(job.stage, Stage::Completed);
        match &job.outcome {
            Some(JobOutcome::Completed { published_id, history_committed }) => {
                assert_eq!(published_id, "BV1234567890");
                assert!(*history_committed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.history.ids(), vec!["abc".to_string()]);

        let folder = h.root.join("abc");
        assert!(folder.join("abc_fix.srt").exists());
        assert!(folder.join("abc_bilingual.ass").exists());
        assert!(folder.join("abc_bilingual.mp4").exists());
        let bilingual = std::fs::read_to_string(folder.join("abc_bilingual.srt")).unwrap();
        assert!(bilingual.contains("Hello there how are you\n译Hello there how are you"));
    }

    #[tokio::test]
    async fn test_rendering_failure_leaves_history_untouched() {
        let h = harness(true, true, MemoryHistoryStore::default());
        let job = h.workflow.run_job(&WorkItem::new("abc")).await;

        assert_eq!(job.stage, Stage::Failed);
        assert_eq!(job.failed_stage(), Some(Stage::Rendering));
        assert!(matches!(job.outcome, Some(JobOutcome::Failed { error: RelayError::Encoding(_), .. })));
        assert!(h.history.ids().is_empty());
        assert_eq!(h.encodes.load(Ordering::SeqCst), 1);
        assert_eq!(h.publishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_subtitles_fail_at_download() {
        let h = harness(false, false, MemoryHistoryStore::default());
        let job = h.workflow.run_job(&WorkItem::new("abc")).await;

        assert_eq!(job.failed_stage(), Some(Stage::Downloading));
        assert!(matches!(job.outcome, Some(JobOutcome::Failed { error: RelayError::Validation(_), .. })));
        assert_eq!(h.encodes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_history_write_failure_still_completes() {
        let history = MemoryHistoryStore {
            fail_writes: true,
            ..MemoryHistoryStore::default()
        };
        let h = harness(true, false, history);
        let job = h.workflow.run_job(&WorkItem::new("abc")).await;

        assert!(job.succeeded());
        assert!(matches!(
            job.outcome,
            Some(JobOutcome::Completed { history_committed: false, .. })
        ));
    }

    #[test]
    fn test_folder_name() {
        assert_eq!(folder_name("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(folder_name("../x"), "___x");
    }

    #[test]
    fn test_dry_run_skips_uploader_setup() {
        let mut config = Config::default();
        config.translate.api_key = "sk-test".to_string();
        config.publish.id_pattern = "(".to_string();
        let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::default());

        assert!(Workflow::from_config(config.clone(), history.clone(), true).is_ok());
        assert!(matches!(
            Workflow::from_config(config, history, false),
            Err(RelayError::Config(_))
        ));
    }
}
