use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use simulacra_config::SimulationConfig;
use simulacra_llm::LanguageModel;
use simulacra_memory::timefmt;
use simulacra_persona::{reflect, Persona};
use simulacra_world::{Maze, TileCoord, TileEvent};

use crate::storage::{
    copy_dir_recursive, write_tempo_files, EnvPersona, MovementFile, MovementMeta,
    PersonaMovement, SimMeta,
};

pub struct SimulationServer {
    config: SimulationConfig,
    llm: Arc<dyn LanguageModel>,
    pub sim_code: String,
    pub fork_sim_code: String,
    sim_folder: PathBuf,
    start_time: NaiveDateTime,
    pub curr_time: NaiveDateTime,
    sec_per_step: i64,
    pub step: u64,
    pub maze: Maze,
    /// Deterministic cognition order, fixed at load time.
    persona_order: Vec<String>,
    pub personas: BTreeMap<String, Persona>,
    personas_tile: HashMap<String, TileCoord>,
    /// Object events placed this tick, to be turned idle at the start of
    /// the next one.
    game_obj_cleanup: HashMap<TileEvent, TileCoord>,
}

impl SimulationServer {
    /// Fork `fork_sim_code` into `sim_code` and load the result.
    ///
    /// Every simulation starts as a copy of a prior one; the first is
    /// hand-crafted.  The copy's meta records where it came from.
    pub fn new(
        config: SimulationConfig,
        llm: Arc<dyn LanguageModel>,
        fork_sim_code: &str,
        sim_code: &str,
    ) -> Result<Self> {
        let fork_folder = PathBuf::from(config.sim_folder(fork_sim_code));
        let sim_folder = PathBuf::from(config.sim_folder(sim_code));
        copy_dir_recursive(&fork_folder, &sim_folder)
            .with_context(|| format!("forking {fork_sim_code} into {sim_code}"))?;

        let meta_path = sim_folder.join("reverie/meta.json");
        let mut meta = SimMeta::load(&meta_path)?;
        meta.fork_sim_code = fork_sim_code.to_string();
        meta.save(&meta_path)?;

        let maze = Maze::load(config.maze_file(&meta.maze_name))
            .with_context(|| format!("loading maze {}", meta.maze_name))?;

        let env_path = sim_folder
            .join("environment")
            .join(format!("{}.json", meta.step));
        let raw = fs::read_to_string(&env_path)
            .with_context(|| format!("reading initial environment {}", env_path.display()))?;
        let init_env: HashMap<String, EnvPersona> = serde_json::from_str(&raw)?;

        let mut server = Self {
            start_time: meta.start_time()?,
            curr_time: meta.curr_time,
            sec_per_step: meta.sec_per_step,
            step: meta.step,
            sim_code: sim_code.to_string(),
            fork_sim_code: fork_sim_code.to_string(),
            maze,
            persona_order: meta.persona_names.clone(),
            personas: BTreeMap::new(),
            personas_tile: HashMap::new(),
            game_obj_cleanup: HashMap::new(),
            sim_folder,
            config,
            llm,
        };

        for name in &server.persona_order {
            let folder = server.sim_folder.join("personas").join(name);
            let persona = Persona::load(
                name,
                &folder,
                server.config.server.seed,
                &server.config.server.fallback_address,
            )?;
            let tile = init_env
                .get(name)
                .map(EnvPersona::tile)
                .with_context(|| format!("{name} missing from the initial environment"))?;

            let (s, p, o, d) = persona.scratch.curr_event_and_desc();
            server
                .maze
                .add_event_from_tile(TileEvent::new(s, p, o, d), tile);
            server.personas_tile.insert(name.clone(), tile);
            server.personas.insert(name.clone(), persona);
        }

        write_tempo_files(
            &PathBuf::from(&server.config.storage.temp_storage_path),
            sim_code,
            server.step,
        )?;

        info!(
            sim = %server.sim_code,
            fork = %server.fork_sim_code,
            personas = server.persona_order.len(),
            step = server.step,
            "simulation loaded"
        );
        Ok(server)
    }

    /// Run `steps` ticks, polling for each tick's environment file.
    pub async fn run(&mut self, mut steps: u64) -> Result<()> {
        while steps > 0 {
            let env_path = self
                .sim_folder
                .join("environment")
                .join(format!("{}.json", self.step));
            if env_path.exists() {
                match fs::read_to_string(&env_path)
                    .map_err(anyhow::Error::from)
                    .and_then(|raw| {
                        serde_json::from_str::<HashMap<String, EnvPersona>>(&raw)
                            .map_err(anyhow::Error::from)
                    }) {
                    Ok(env) => {
                        self.process_tick(env).await?;
                        steps -= 1;
                    }
                    // A malformed file skips this tick's work; the next
                    // poll retries once the frontend rewrites it.
                    Err(err) => warn!(step = self.step, %err, "environment file unreadable"),
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.server.server_sleep_ms)).await;
        }
        Ok(())
    }

    async fn process_tick(&mut self, env: HashMap<String, EnvPersona>) -> Result<()> {
        // Restore the object events placed last tick to their blank form.
        for (event, tile) in std::mem::take(&mut self.game_obj_cleanup) {
            self.maze.turn_event_from_tile_idle(&event, tile);
        }

        // Mirror the frontend's tile moves onto the maze before any
        // persona perceives anything this tick.
        for name in &self.persona_order {
            let persona = self
                .personas
                .get(name)
                .with_context(|| format!("unknown persona {name}"))?;
            let old_tile = self.personas_tile[name];
            let new_tile = env
                .get(name)
                .map(EnvPersona::tile)
                .with_context(|| format!("{name} missing from environment {}", self.step))?;

            self.personas_tile.insert(name.clone(), new_tile);
            self.maze.remove_subject_events_from_tile(name, old_tile);
            let (s, p, o, d) = persona.scratch.curr_event_and_desc();
            self.maze
                .add_event_from_tile(TileEvent::new(s, p, o, d), new_tile);

            // Once a persona has arrived, its action plays out on the
            // object: swap the blank marker for the object event and
            // remember to undo it next tick.
            if persona.scratch.planned_path.is_empty() {
                let (s, p, o, d) = persona.scratch.curr_obj_event_and_desc();
                if !s.is_empty() {
                    let obj_event = TileEvent::new(s.clone(), p, o, d);
                    self.game_obj_cleanup.insert(obj_event.clone(), new_tile);
                    self.maze.add_event_from_tile(obj_event, new_tile);
                    self.maze
                        .remove_event_from_tile(&TileEvent::blank(s), new_tile);
                }
            }
        }

        // The cognition pass: every persona moves, in a fixed order.
        let mut movements = BTreeMap::new();
        for name in self.persona_order.clone() {
            let mut persona = self
                .personas
                .remove(&name)
                .with_context(|| format!("unknown persona {name}"))?;
            let tile = self.personas_tile[&name];
            let result = persona
                .advance(
                    &self.maze,
                    &mut self.personas,
                    tile,
                    self.curr_time,
                    self.llm.as_ref(),
                )
                .await;
            let chat = persona.scratch.chat.clone();
            self.personas.insert(name.clone(), persona);
            let movement = result?;

            debug!(persona = %name, tile = ?movement.next_tile, "moved");
            movements.insert(
                name,
                PersonaMovement {
                    movement: movement.next_tile,
                    pronunciatio: movement.pronunciatio,
                    description: movement.description,
                    chat,
                },
            );
        }

        let movement_file = MovementFile {
            persona: movements,
            meta: MovementMeta {
                curr_time: timefmt::format(&self.curr_time),
            },
        };
        let movement_dir = self.sim_folder.join("movement");
        fs::create_dir_all(&movement_dir)?;
        fs::write(
            movement_dir.join(format!("{}.json", self.step)),
            serde_json::to_string_pretty(&movement_file)?,
        )?;

        self.step += 1;
        self.curr_time += chrono::Duration::seconds(self.sec_per_step);
        debug!(step = self.step, time = %self.curr_time, "tick complete");
        Ok(())
    }

    /// Persist the simulation's global state and every persona.
    pub fn save(&self) -> Result<()> {
        let meta = SimMeta {
            fork_sim_code: self.fork_sim_code.clone(),
            start_date: self.start_time.format(crate::storage::DATE_FORMAT).to_string(),
            curr_time: self.curr_time,
            sec_per_step: self.sec_per_step,
            maze_name: self.maze.maze_name.clone(),
            persona_names: self.persona_order.clone(),
            step: self.step,
        };
        meta.save(self.sim_folder.join("reverie/meta.json"))?;

        for (name, persona) in &self.personas {
            persona.save(self.sim_folder.join("personas").join(name))?;
        }
        info!(sim = %self.sim_code, step = self.step, "simulation saved");
        Ok(())
    }

    /// Delete the simulation directory without saving (the `exit` path).
    pub fn discard(&self) -> Result<()> {
        fs::remove_dir_all(&self.sim_folder)?;
        Ok(())
    }

    /// Whisper-inject operator memories from a CSV of
    /// `persona_name, "whisper; whisper; …"` rows.
    pub async fn load_history(&mut self, csv_path: &str) -> Result<usize> {
        let mut reader = csv::Reader::from_path(csv_path)
            .with_context(|| format!("opening history file {csv_path}"))?;
        let mut injected = 0;
        for record in reader.records() {
            let record = record?;
            let name = record.get(0).unwrap_or("").trim().to_string();
            let whispers: Vec<String> = record
                .get(1)
                .unwrap_or("")
                .split(';')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect();

            let Some(persona) = self.personas.get_mut(&name) else {
                warn!(%name, "history row names an unknown persona");
                continue;
            };
            let at = persona.scratch.curr_time.unwrap_or(self.curr_time);
            injected += whispers.len();
            reflect::load_history_whispers(persona, &whispers, at, self.llm.as_ref()).await?;
        }
        info!(injected, "history whispers loaded");
        Ok(injected)
    }

    pub fn persona(&self, name: &str) -> Option<&Persona> {
        self.personas.get(name)
    }

    pub fn persona_names(&self) -> &[String] {
        &self.persona_order
    }

    pub fn current_tile(&self, name: &str) -> Option<TileCoord> {
        self.personas_tile.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use simulacra_memory::{AssociativeMemory, Scratch, SpatialTree};
    use simulacra_world::{MazeSheet, TileSeed};
    use std::path::Path;

    /// Errors on every completion so the documented fallbacks drive the
    /// run; embeddings are constant.
    struct OfflineModel;

    #[async_trait]
    impl LanguageModel for OfflineModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(anyhow!("offline"))
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.5, 0.5])
        }
    }

    fn write_fixture(root: &Path) -> Result<SimulationConfig> {
        let mut config = SimulationConfig::default();
        config.storage.storage_path = root.join("storage").display().to_string();
        config.storage.temp_storage_path = root.join("temp").display().to_string();
        config.storage.mazes_path = root.join("mazes").display().to_string();
        config.server.server_sleep_ms = 1;
        config.server.fallback_address = "the ville:park:park garden".to_string();

        // Maze: a 4x4 sheet with a park strip.
        let sheet = MazeSheet {
            maze_name: "test ville".into(),
            width: 4,
            height: 4,
            collision: vec![vec![false; 4]; 4],
            tiles: vec![
                TileSeed {
                    x: 0,
                    y: 0,
                    world: "the ville".into(),
                    sector: "park".into(),
                    arena: "park garden".into(),
                    ..TileSeed::default()
                },
                TileSeed {
                    x: 1,
                    y: 0,
                    world: "the ville".into(),
                    sector: "park".into(),
                    arena: "park garden".into(),
                    ..TileSeed::default()
                },
            ],
        };
        fs::create_dir_all(root.join("mazes"))?;
        fs::write(
            root.join("mazes/test ville.json"),
            serde_json::to_string_pretty(&sheet)?,
        )?;

        // The hand-crafted base simulation.
        let base = root.join("storage/base_sim");
        let meta = SimMeta {
            fork_sim_code: "base_sim".into(),
            start_date: "February 13, 2023".into(),
            curr_time: timefmt::parse("February 13, 2023, 00:00:00")?,
            sec_per_step: 10,
            maze_name: "test ville".into(),
            persona_names: vec!["Isabella Rodriguez".into()],
            step: 0,
        };
        meta.save(base.join("reverie/meta.json"))?;

        fs::create_dir_all(base.join("environment"))?;
        fs::write(
            base.join("environment/0.json"),
            serde_json::to_string_pretty(&serde_json::json!({
                "Isabella Rodriguez": {"x": 1, "y": 0, "maze": "test ville"}
            }))?,
        )?;

        let persona_dir = base.join("personas/Isabella Rodriguez/bootstrap_memory");
        let mut scratch = Scratch::bootstrap("Isabella Rodriguez");
        scratch.living_area = "the ville:park".into();
        scratch.save(persona_dir.join("scratch.json"))?;
        SpatialTree::new().save(persona_dir.join("spatial_memory.json"))?;
        AssociativeMemory::new().save(persona_dir.join("associative_memory"))?;

        Ok(config)
    }

    fn write_env(config: &SimulationConfig, sim: &str, step: u64, tile: TileCoord) {
        let path = PathBuf::from(config.sim_folder(sim))
            .join("environment")
            .join(format!("{step}.json"));
        fs::write(
            path,
            serde_json::to_string_pretty(&serde_json::json!({
                "Isabella Rodriguez": {"x": tile.0, "y": tile.1, "maze": "test ville"}
            }))
            .unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn fork_rewrites_meta_and_signals_the_frontend() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = write_fixture(dir.path())?;

        let server =
            SimulationServer::new(config.clone(), Arc::new(OfflineModel), "base_sim", "run_1")?;

        let meta = SimMeta::load(dir.path().join("storage/run_1/reverie/meta.json"))?;
        assert_eq!(meta.fork_sim_code, "base_sim");
        assert!(dir.path().join("temp/curr_sim_code.json").exists());
        assert!(dir.path().join("temp/curr_step.json").exists());
        assert_eq!(server.persona_names(), ["Isabella Rodriguez".to_string()]);
        assert_eq!(server.current_tile("Isabella Rodriguez"), Some((1, 0)));
        Ok(())
    }

    #[tokio::test]
    async fn ticks_consume_environments_and_emit_movements() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = write_fixture(dir.path())?;
        let mut server =
            SimulationServer::new(config.clone(), Arc::new(OfflineModel), "base_sim", "run_2")?;

        server.run(1).await?;
        assert_eq!(server.step, 1);
        assert_eq!(server.curr_time, timefmt::parse("February 13, 2023, 00:00:10")?);

        let raw = fs::read_to_string(dir.path().join("storage/run_2/movement/0.json"))?;
        let movement: MovementFile = serde_json::from_str(&raw)?;
        let entry = &movement.persona["Isabella Rodriguez"];
        assert!(!entry.pronunciatio.is_empty());
        assert_eq!(movement.meta.curr_time, "February 13, 2023, 00:00:00");

        // The first tick planned a full day even with the model offline.
        let persona = server.persona("Isabella Rodriguez").unwrap();
        assert_eq!(persona.scratch.schedule_minutes_sum(), 1440);

        // Second tick.
        write_env(&config, "run_2", 1, entry.movement);
        server.run(1).await?;
        assert_eq!(server.step, 2);
        Ok(())
    }

    #[tokio::test]
    async fn save_then_reload_preserves_progress() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = write_fixture(dir.path())?;
        let mut server =
            SimulationServer::new(config.clone(), Arc::new(OfflineModel), "base_sim", "run_3")?;
        server.run(1).await?;
        server.save()?;

        let meta = SimMeta::load(dir.path().join("storage/run_3/reverie/meta.json"))?;
        assert_eq!(meta.step, 1);
        assert_eq!(meta.curr_time, server.curr_time);

        // A fork of the saved run resumes from the persisted scratch.
        write_env(&config, "run_3", 1, (1, 0));
        let resumed =
            SimulationServer::new(config, Arc::new(OfflineModel), "run_3", "run_4")?;
        let persona = resumed.persona("Isabella Rodriguez").unwrap();
        assert!(persona.scratch.curr_time.is_some());
        assert_eq!(persona.scratch.schedule_minutes_sum(), 1440);
        Ok(())
    }

    #[tokio::test]
    async fn whisper_history_becomes_thoughts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = write_fixture(dir.path())?;
        let mut server =
            SimulationServer::new(config, Arc::new(OfflineModel), "base_sim", "run_5")?;

        let csv_path = dir.path().join("history.csv");
        fs::write(
            &csv_path,
            "name,whispers\nIsabella Rodriguez,is planning a party; loves the park\n",
        )?;
        let injected = server.load_history(csv_path.to_str().unwrap()).await?;
        assert_eq!(injected, 2);

        let persona = server.persona("Isabella Rodriguez").unwrap();
        assert_eq!(
            persona
                .a_mem
                .nodes_of(simulacra_memory::NodeKind::Thought)
                .len(),
            2
        );
        Ok(())
    }
}
