#![allow(dead_code)]

use ::std::{collections::BTreeMap, path::Path};
use eld::{
    extract_ngrams, normalize_text, write_blob, BackendMode, DataCache, LanguageDatabase,
    LanguageId, LoadOptions, NgramTable,
};
use tempfile::TempDir;

pub const LANGUAGES: [&str; 4] = ["en", "es", "de", "fr"];
pub const EN: LanguageId = 0;
pub const ES: LanguageId = 1;
pub const DE: LanguageId = 2;
pub const FR: LanguageId = 3;

const ENGLISH: &str = "\
Hello, how are you? I am fine, thank you very much.
The house is very big and the garden is beautiful.
I want to go to the market with my brother tomorrow morning.
What is your name? My name is John and I live in London.
We have been working together for many years and it was always a pleasure.
She reads a book every evening before going to sleep.
The weather today is cold, but the children are playing outside.
Where is the nearest station? It is just around the corner.";

const SPANISH: &str = "\
Hola, cómo te llamas? Me llamo María y vivo en Madrid.
La casa es muy grande y el jardín es precioso.
Quiero ir al mercado con mi hermano mañana por la mañana.
Ella tiene el pelo largo y los ojos marrones.
Hemos trabajado juntos durante muchos años y siempre fue un placer.
Bien, gracias. Y usted, qué tal está?
El tiempo hoy es frío, pero los niños están jugando fuera.
Dónde está la estación más cercana? Está justo a la vuelta de la esquina.";

const GERMAN: &str = "\
Hallo, wie geht es dir? Mir geht es gut, danke schön.
Das Haus ist sehr groß und der Garten ist wunderschön.
Ich möchte morgen früh mit meinem Bruder auf den Markt gehen.
Wie heißt du? Ich heiße Peter und wohne in Berlin.
Wir arbeiten seit vielen Jahren zusammen und es war immer eine Freude.
Sie liest jeden Abend ein Buch, bevor sie schlafen geht.
Das Wetter ist heute kalt, aber die Kinder spielen draußen.
Wo ist der nächste Bahnhof? Er ist gleich um die Ecke.";

const FRENCH: &str = "\
Bonjour, comment allez-vous? Je vais bien, merci beaucoup.
La maison est très grande et le jardin est magnifique.
Je veux aller au marché avec mon frère demain matin.
Comment tu t'appelles? Je m'appelle Pierre et j'habite à Paris.
Nous travaillons ensemble depuis de nombreuses années et c'était toujours un plaisir.
Elle lit un livre chaque soir avant de dormir.
Le temps est froid aujourd'hui, mais les enfants jouent dehors.
Où est la gare la plus proche? Elle est juste au coin de la rue.";

/// Frequencies of every training n-gram, on the same scale as text n-grams
pub fn train_table(name: &str) -> NgramTable {
    let mut ngrams: BTreeMap<Vec<u8>, Vec<(LanguageId, f32)>> = BTreeMap::new();
    for (lang, text) in [ENGLISH, SPANISH, GERMAN, FRENCH].into_iter().enumerate() {
        let normalized: Vec<String> = text.lines().map(normalize_text).collect();
        let text_ngrams = extract_ngrams(&normalized.join(" "), 4, 3);
        for (key, frequency) in text_ngrams.iter() {
            ngrams
                .entry(key.to_vec())
                .or_default()
                .push((lang as LanguageId, frequency as f32));
        }
    }

    let mut table = NgramTable::new(name, LANGUAGES, 4, 3).with_avg_scores(vec![1.0; LANGUAGES.len()]);
    for (key, scores) in ngrams {
        table.insert(&key, scores).unwrap();
    }
    table
}

/// Data directory holding the trained table as the `small` tier, in every format
pub fn data_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let table = train_table("ngrams-s");
    table
        .write(&dir.path().join("array").join("ngrams-s.encom.br"), true)
        .unwrap();
    write_blob(&table, &dir.path().join("blob"), "ngrams-s").unwrap();
    dir
}

pub fn options(dir: &Path, mode: BackendMode) -> LoadOptions {
    LoadOptions::default()
        .data_dir(dir)
        .mode(mode)
        .memory_limit(u64::MAX)
}

pub fn load(dir: &Path, mode: BackendMode) -> LanguageDatabase {
    LanguageDatabase::load("small", options(dir, mode), &DataCache::new()).unwrap()
}

pub const ALL_MODES: [BackendMode; 4] = [
    BackendMode::InMemoryMap,
    BackendMode::SerializedBlob,
    BackendMode::RawBytes,
    BackendMode::DiskStream,
];

/// Texts with an unambiguous language
pub const TEXTS: [(LanguageId, &str); 8] = [
    (EN, "The children are playing in the garden with my brother"),
    (EN, "Where is the market? I want to go there tomorrow"),
    (ES, "Hola, cómo te llamas?"),
    (ES, "Los niños están jugando en el jardín con mi hermano"),
    (DE, "Die Kinder spielen im Garten mit meinem Bruder"),
    (DE, "Wo ist der Markt? Ich möchte morgen dort hingehen"),
    (FR, "Les enfants jouent dans le jardin avec mon frère"),
    (FR, "Où est le marché? Je veux y aller demain matin"),
];
