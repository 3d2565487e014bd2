//! Static game data used to validate queries and adapt drafts

/// (class, ascendancies)
const CLASSES: &[(&str, &[&str])] = &[
    ("Marauder", &["Juggernaut", "Berserker", "Chieftain"]),
    ("Ranger", &["Deadeye", "Raider", "Pathfinder"]),
    ("Witch", &["Necromancer", "Elementalist", "Occultist"]),
    ("Duelist", &["Slayer", "Gladiator", "Champion"]),
    ("Templar", &["Inquisitor", "Hierophant", "Guardian"]),
    ("Shadow", &["Assassin", "Trickster", "Saboteur"]),
    ("Scion", &["Ascendant"]),
];

/// Passives that only exist on one ascendancy tree. A draft moved to another
/// ascendancy loses them.
const ASCENDANCY_KEYSTONES: &[(&str, &[&str])] = &[
    ("Juggernaut", &["Unflinching", "Unstoppable", "Undeniable"]),
    ("Berserker", &["Aspect of Carnage", "Rite of Ruin"]),
    ("Chieftain", &["Tasalio, Cleansing Water", "Ngamahu, Flame's Advance"]),
    ("Deadeye", &["Far Shot", "Gathering Winds", "Endless Munitions"]),
    ("Raider", &["Avatar of the Veil", "Quartz Infusion"]),
    ("Pathfinder", &["Master Surgeon", "Nature's Reprisal"]),
    ("Necromancer", &["Mindless Aggression", "Bone Barrier"]),
    ("Elementalist", &["Heart of Destruction", "Shaper of Flames"]),
    ("Occultist", &["Profane Bloom", "Wicked Ward"]),
    ("Slayer", &["Headsman", "Brutal Fervour"]),
    ("Gladiator", &["Painforged", "Versatile Combatant"]),
    ("Champion", &["Fortitude", "Inspirational"]),
    ("Inquisitor", &["Inevitable Judgement", "Augury of Penitence"]),
    ("Hierophant", &["Arcane Blessing", "Conviction of Power"]),
    ("Guardian", &["Radiant Faith", "Unwavering Faith"]),
    ("Assassin", &["Opportunistic", "Mistwalker"]),
    ("Trickster", &["Escape Artist", "Polymath"]),
    ("Saboteur", &["Pyromaniac", "Chain Reaction"]),
];

/// Expensive support gem → cheaper alternative filling a similar role.
const BUDGET_SUPPORTS: &[(&str, &str)] = &[
    ("Empower Support", "Inspiration Support"),
    ("Enlighten Support", "Inspiration Support"),
    ("Enhance Support", "Increased Critical Strikes Support"),
    ("Greater Multiple Projectiles Support", "Lesser Multiple Projectiles Support"),
    ("Elemental Damage with Attacks Support", "Added Fire Damage Support"),
    ("Void Manipulation Support", "Controlled Destruction Support"),
    ("Unleash Support", "Spell Echo Support"),
    ("Trinity Support", "Elemental Focus Support"),
    ("Hextouch Support", "Efficacy Support"),
];

/// Canonical spelling of a known class name.
pub fn canonical_class(name: &str) -> Option<&'static str> {
    let name = name.trim();
    CLASSES
        .iter()
        .find(|(class, _)| class.eq_ignore_ascii_case(name))
        .map(|(class, _)| *class)
}

/// Canonical spelling of `ascendancy` if it belongs to `class`.
pub fn canonical_ascendancy(class: &str, ascendancy: &str) -> Option<&'static str> {
    let ascendancy = ascendancy.trim();
    CLASSES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(class.trim()))
        .and_then(|(_, ascs)| ascs.iter().find(|a| a.eq_ignore_ascii_case(ascendancy)))
        .copied()
}

/// Ascendancy that owns `keystone`, if it is ascendancy-specific.
pub fn keystone_owner(keystone: &str) -> Option<&'static str> {
    ASCENDANCY_KEYSTONES
        .iter()
        .find(|(_, keystones)| keystones.iter().any(|k| k.eq_ignore_ascii_case(keystone)))
        .map(|(asc, _)| *asc)
}

/// Whether a draft targeting `ascendancy` (or none) may keep `keystone`.
pub fn keystone_compatible(keystone: &str, ascendancy: Option<&str>) -> bool {
    match keystone_owner(keystone) {
        None => true,
        Some(owner) => ascendancy.is_some_and(|a| owner.eq_ignore_ascii_case(a)),
    }
}

/// Budget-tier replacement for a support gem.
pub fn budget_alternative(gem: &str) -> Option<String> {
    if let Some(base) = gem.strip_prefix("Awakened ") {
        return Some(base.to_string());
    }
    BUDGET_SUPPORTS
        .iter()
        .find(|(premium, _)| premium.eq_ignore_ascii_case(gem))
        .map(|(_, cheap)| cheap.to_string())
}
