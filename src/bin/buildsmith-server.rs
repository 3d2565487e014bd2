//! Buildsmith HTTP server binary

use buildsmith::market::MarketData;
use buildsmith::retrieval::describe_build;
use buildsmith::{
    BuildRecord, CalculationOracle, Embedder, EngineConfig, HashingEmbedder, HttpEmbedder,
    HttpOracle, HttpProvider, MockOracle, MockProvider, Orchestrator, ProviderAdapter,
    VectorIndex,
};
use std::sync::Arc;

mod server {
    pub use buildsmith::server::*;
}

const MOCK_EMBEDDING_DIM: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    println!("Buildsmith recommendation server");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = EngineConfig::from_env()?;
    let port: u16 = std::env::var("BUILDSMITH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8082);

    // Check for --use-real flag
    let use_real = std::env::args().any(|arg| arg == "--use-real");

    let engine = if use_real {
        println!("✓ Mode: REAL market sources, embedder and oracle");
        let league = std::env::var("BUILDSMITH_LEAGUE").unwrap_or_else(|_| "Standard".to_string());
        let sources = std::env::var("BUILDSMITH_MARKET_SOURCES")
            .unwrap_or_else(|_| "poe-ninja=http://127.0.0.1:9000".to_string());
        let embedding_url = std::env::var("BUILDSMITH_EMBEDDING_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string());
        let oracle_url = std::env::var("BUILDSMITH_ORACLE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8095".to_string());
        let kb_path = std::env::var("BUILDSMITH_KNOWLEDGE_BASE")
            .unwrap_or_else(|_| "data/knowledge_base.json".to_string());

        let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
        for entry in sources.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((id, url)) = entry.split_once('=') else {
                anyhow::bail!("BUILDSMITH_MARKET_SOURCES entry '{}' is not id=url", entry);
            };
            println!("✓ Market source {}: {} (league {})", id, url, league);
            adapters.push(Arc::new(HttpProvider::new(id, url, league.as_str())));
        }

        let embedder = HttpEmbedder::new(
            embedding_url.clone(),
            std::env::var("BUILDSMITH_EMBEDDING_MODEL").ok(),
        );
        match embedder.health_check().await {
            Ok(true) => println!("✓ Embedding service is healthy: {}", embedding_url),
            Ok(false) => eprintln!("⚠️  Embedding service unhealthy: {}", embedding_url),
            Err(e) => eprintln!("⚠️  Embedding service unreachable ({}); retrieval will be skipped", e),
        }

        let oracle = HttpOracle::new(oracle_url.clone());
        match oracle.health_check().await {
            Ok(true) => println!("✓ Calculation oracle is healthy: {}", oracle_url),
            Ok(false) => eprintln!("⚠️  Calculation oracle unhealthy: {}", oracle_url),
            Err(e) => eprintln!("⚠️  Calculation oracle unreachable ({}); results will be unvalidated", e),
        }

        let index = VectorIndex::load_json_file(&kb_path)?;
        println!("✓ Knowledge base: {} builds from {}", index.len(), kb_path);

        let embedder: Arc<dyn Embedder> = Arc::new(embedder);
        let oracle: Arc<dyn CalculationOracle> = Arc::new(oracle);
        Orchestrator::with_index(config, adapters, Arc::new(index), embedder, oracle)?
    } else {
        println!("✓ Mode: MOCK providers, hashing embedder, mock oracle");
        println!("   (use --use-real to call real services)");

        let embedder = HashingEmbedder::new(MOCK_EMBEDDING_DIM);
        let knowledge_base = sample_knowledge_base(&embedder);
        let oracle = MockOracle::from_builds(&knowledge_base);
        let adapters = mock_providers(&knowledge_base);

        Orchestrator::new(
            config,
            adapters,
            knowledge_base,
            Arc::new(embedder),
            Arc::new(oracle),
        )?
    };

    println!("✓ Orchestrator initialized");
    println!("✓ Starting HTTP server on port {}...", port);
    println!();

    server::run_server(Arc::new(engine), port).await?;

    Ok(())
}

/// Two healthy market sources with overlapping quotes and one that is down.
fn mock_providers(knowledge_base: &[BuildRecord]) -> Vec<Arc<dyn ProviderAdapter>> {
    let mut ninja = MarketData::default();
    let mut trade = MarketData::default();
    for (i, build) in knowledge_base.iter().enumerate() {
        if let Some(cost) = build.cost {
            ninja.build_prices.insert(build.id.clone(), cost);
            if i % 2 == 0 {
                trade.build_prices.insert(build.id.clone(), cost * 1.1);
            }
        }
        let mut listed = build.clone();
        listed.embedding_vector.clear();
        ninja.builds.push(listed);
    }
    for (gem, price) in [
        ("Empower Support", 45.0),
        ("Enlighten Support", 60.0),
        ("Inspiration Support", 0.5),
        ("Awakened Added Fire Damage Support", 8.0),
        ("Added Fire Damage Support", 0.2),
        ("Greater Multiple Projectiles Support", 1.0),
        ("Lesser Multiple Projectiles Support", 0.1),
    ] {
        ninja.gem_prices.insert(gem.to_string(), price);
        trade.gem_prices.insert(gem.to_string(), price * 0.9);
    }

    vec![
        Arc::new(MockProvider::healthy("poe-ninja", ninja.into_payload())),
        Arc::new(MockProvider::healthy("poe-trade", trade.into_payload())),
        Arc::new(MockProvider::failing("build-archive")),
    ]
}

/// Sample knowledge base, embedded with the same hashing embedder used for
/// queries
fn sample_knowledge_base(embedder: &HashingEmbedder) -> Vec<BuildRecord> {
    #[allow(clippy::type_complexity)]
    let rows: &[(&str, &str, &str, &str, &[&str], &str, &[&str], f64, f64, f64, f64, u32)] = &[
        ("ts-deadeye", "Ranger", "Deadeye", "Tornado Shot",
            &["Greater Multiple Projectiles Support", "Mirage Archer Support", "Empower Support", "Inspiration Support", "Trinity Support"],
            "Bow", &["Far Shot", "Point Blank"], 4_200_000.0, 4_800.0, 0.0, 35.0, 1),
        ("la-deadeye", "Ranger", "Deadeye", "Lightning Arrow",
            &["Awakened Added Fire Damage Support", "Inspiration Support", "Mirage Archer Support", "Trinity Support"],
            "Bow", &["Gathering Winds"], 2_100_000.0, 4_400.0, 0.0, 8.0, 2),
        ("ice-shot-pf", "Ranger", "Pathfinder", "Ice Shot",
            &["Greater Multiple Projectiles Support", "Added Cold Damage Support", "Hypothermia Support"],
            "Bow", &["Master Surgeon"], 900_000.0, 5_200.0, 0.0, 3.0, 6),
        ("ek-elementalist", "Witch", "Elementalist", "Ethereal Knives",
            &["Unleash Support", "Empower Support", "Controlled Destruction Support"],
            "Wand", &["Shaper of Flames"], 1_600_000.0, 3_000.0, 3_500.0, 12.0, 4),
        ("arc-elementalist", "Witch", "Elementalist", "Arc",
            &["Inspiration Support", "Controlled Destruction Support", "Lightning Penetration Support"],
            "Staff", &["Heart of Destruction"], 1_100_000.0, 4_100.0, 1_200.0, 2.0, 3),
        ("rf-chieftain", "Marauder", "Chieftain", "Righteous Fire",
            &["Efficacy Support", "Burning Damage Support", "Elemental Focus Support"],
            "Shield", &["Ngamahu, Flame's Advance"], 700_000.0, 9_500.0, 0.0, 4.0, 5),
        ("boneshatter-jugg", "Marauder", "Juggernaut", "Boneshatter",
            &["Fist of War Support", "Ruthless Support", "Pulverise Support", "Melee Physical Damage Support"],
            "Two Handed Axe", &["Unflinching", "Resolute Technique"], 1_300_000.0, 7_200.0, 0.0, 5.0, 7),
        ("cyclone-slayer", "Duelist", "Slayer", "Cyclone",
            &["Melee Physical Damage Support", "Brutality Support", "Impale Support", "Enhance Support", "Awakened Melee Splash Support"],
            "Two Handed Sword", &["Headsman"], 3_000_000.0, 5_600.0, 0.0, 40.0, 9),
        ("sst-raider", "Ranger", "Raider", "Splitting Steel",
            &["Impale Support", "Melee Physical Damage Support", "Brutality Support"],
            "One Handed Sword", &["Avatar of the Veil"], 1_000_000.0, 4_600.0, 0.0, 1.5, 12),
        ("poison-sre-trickster", "Shadow", "Trickster", "Storm Rain",
            &["Void Manipulation Support", "Mirage Archer Support", "Unbound Ailments Support"],
            "Bow", &["Polymath"], 1_800_000.0, 3_900.0, 1_500.0, 6.0, 10),
    ];

    rows.iter()
        .map(
            |&(id, class, asc, skill, supports, weapon, keystones, dps, life, es, cost, rank)| {
                let mut record = BuildRecord {
                    id: id.to_string(),
                    class: class.to_string(),
                    ascendancy: Some(asc.to_string()),
                    main_skill: skill.to_string(),
                    support_skills: supports.iter().map(|s| s.to_string()).collect(),
                    weapon_type: weapon.to_string(),
                    keystones: keystones.iter().map(|k| k.to_string()).collect(),
                    dps,
                    life,
                    energy_shield: es,
                    cost: Some(cost),
                    popularity_rank: rank,
                    embedding_vector: Vec::new(),
                };
                record.embedding_vector = embedder.vectorize(&describe_build(&record));
                record
            },
        )
        .collect()
}
