use crate::params::ScaffoldParams;
use anyhow::{Result, bail};
use forge_policy::PathPolicy;
use regex::Regex;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

pub const TEMPLATE_TYPES: &[&str] = &[
    "express-api",
    "express-api-swagger",
    "express-api-mongo",
    "vue-app",
    "fullstack",
    "fullstack-auth",
];

const NAME: &str = "__NAME__";

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid project name regex"))
}

const EXPRESS_PACKAGE: &str = r#"{
  "name": "__NAME__",
  "version": "1.0.0",
  "main": "src/server.js",
  "scripts": {
    "start": "node src/server.js",
    "dev": "nodemon src/server.js"
  },
  "dependencies": {
    "cors": "^2.8.5",
    "dotenv": "^16.4.5",
    "express": "^4.19.2",
    "helmet": "^7.1.0",
    "morgan": "^1.10.0"
  },
  "devDependencies": {
    "nodemon": "^3.1.0"
  }
}
"#;

const EXPRESS_SERVER: &str = r#"require('dotenv').config();
const app = require('./app');

const PORT = process.env.PORT || 3000;
app.listen(PORT, () => console.log(`__NAME__ listening on port ${PORT}`));
"#;

const EXPRESS_APP: &str = r#"const express = require('express');
const cors = require('cors');
const helmet = require('helmet');
const morgan = require('morgan');
const routes = require('./routes');
const errorHandler = require('./middlewares/error.middleware');

const app = express();
app.use(helmet());
app.use(cors());
app.use(morgan('dev'));
app.use(express.json());

app.get('/api/health', (req, res) => res.json({ status: 'ok' }));
app.use('/api', routes);
app.use(errorHandler);

module.exports = app;
"#;

const EXPRESS_ROUTES: &str = r#"const express = require('express');
const router = express.Router();

router.get('/', (req, res) => res.json({ message: 'Welcome to __NAME__' }));

module.exports = router;
"#;

const EXPRESS_ERRORS: &str = r#"function errorHandler(err, req, res, next) {
  const status = err.status || 500;
  res.status(status).json({ error: err.message || 'Internal Server Error' });
}

module.exports = errorHandler;
"#;

const SWAGGER_APP: &str = r#"const express = require('express');
const path = require('path');
const swaggerUi = require('swagger-ui-express');
const YAML = require('yamljs');
const routes = require('./routes');

const app = express();
const swaggerDocument = YAML.load(path.join(__dirname, '../swagger.yaml'));

app.use(express.json());
app.use('/api-docs', swaggerUi.serve, swaggerUi.setup(swaggerDocument));
app.get('/api/health', (req, res) => res.json({ status: 'ok' }));
app.use('/api', routes);

module.exports = app;
"#;

const SWAGGER_YAML: &str = r#"openapi: 3.0.0
info:
  title: __NAME__ API
  version: 1.0.0
paths:
  /api/health:
    get:
      summary: Health check
      responses:
        '200':
          description: OK
"#;

const MONGO_DATABASE: &str = r#"const mongoose = require('mongoose');

async function connectDatabase() {
  await mongoose.connect(process.env.MONGO_URI);
  console.log('MongoDB connected');
}

module.exports = connectDatabase;
"#;

const MONGO_SERVER: &str = r#"require('dotenv').config();
const app = require('./app');
const connectDatabase = require('./config/database');

const PORT = process.env.PORT || 3000;
connectDatabase().then(() => {
  app.listen(PORT, () => console.log(`__NAME__ listening on port ${PORT}`));
});
"#;

const MONGO_USER_MODEL: &str = r#"const mongoose = require('mongoose');

const UserSchema = new mongoose.Schema(
  {
    name: { type: String, required: true, trim: true },
    email: { type: String, required: true, unique: true, lowercase: true },
    password: { type: String, required: true, select: false },
  },
  { timestamps: true }
);

module.exports = mongoose.model('User', UserSchema);
"#;

const AUTH_MIDDLEWARE: &str = r#"const jwt = require('jsonwebtoken');

module.exports = function requireAuth(req, res, next) {
  const header = req.headers.authorization || '';
  const token = header.startsWith('Bearer ') ? header.slice(7) : null;
  if (!token) return res.status(401).json({ error: 'Unauthorized' });
  try {
    req.user = jwt.verify(token, process.env.JWT_SECRET);
    next();
  } catch {
    res.status(401).json({ error: 'Invalid token' });
  }
};
"#;

const VUE_PACKAGE: &str = r#"{
  "name": "__NAME__",
  "version": "0.0.0",
  "private": true,
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "pinia": "^2.1.7",
    "vue": "^3.4.21",
    "vue-router": "^4.3.0"
  },
  "devDependencies": {
    "@vitejs/plugin-vue": "^5.0.4",
    "vite": "^5.2.0"
  }
}
"#;

const VUE_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>__NAME__</title>
  </head>
  <body>
    <div id="app"></div>
    <script type="module" src="/src/main.js"></script>
  </body>
</html>
"#;

const VUE_VITE_CONFIG: &str = r#"import { defineConfig } from 'vite'
import vue from '@vitejs/plugin-vue'

export default defineConfig({
  plugins: [vue()],
})
"#;

const VUE_MAIN: &str = r#"import { createApp } from 'vue'
import { createPinia } from 'pinia'
import App from './App.vue'
import router from './router'

createApp(App).use(createPinia()).use(router).mount('#app')
"#;

const VUE_APP: &str = r#"<script setup>
import { RouterView } from 'vue-router'
</script>

<template>
  <RouterView />
</template>
"#;

const VUE_ROUTER: &str = r#"import { createRouter, createWebHistory } from 'vue-router'
import HomeView from '../views/HomeView.vue'

export default createRouter({
  history: createWebHistory(),
  routes: [{ path: '/', name: 'home', component: HomeView }],
})
"#;

const VUE_HOME: &str = r#"<template>
  <main>
    <h1>Welcome to __NAME__</h1>
  </main>
</template>
"#;

const FULLSTACK_PACKAGE: &str = r#"{
  "name": "__NAME__",
  "version": "1.0.0",
  "private": true,
  "scripts": {
    "install:all": "npm install --prefix __NAME__-api && npm install --prefix __NAME__-ui",
    "dev": "npm run dev:api & npm run dev:ui",
    "dev:api": "npm run dev --prefix __NAME__-api",
    "dev:ui": "npm run dev --prefix __NAME__-ui"
  }
}
"#;

fn plan(features: &str) -> String {
    format!("# {NAME} - Implementation Plan\n\n## Objective\nInitial project scaffolding.\n\n## Features\n{features}")
}

fn express_files(prefix: &str) -> Vec<(String, String)> {
    vec![
        (format!("{prefix}package.json"), EXPRESS_PACKAGE.to_string()),
        (
            format!("{prefix}.env.example"),
            "PORT=3000\nNODE_ENV=development\n".to_string(),
        ),
        (format!("{prefix}src/server.js"), EXPRESS_SERVER.to_string()),
        (format!("{prefix}src/app.js"), EXPRESS_APP.to_string()),
        (format!("{prefix}src/routes/index.js"), EXPRESS_ROUTES.to_string()),
        (
            format!("{prefix}src/middlewares/error.middleware.js"),
            EXPRESS_ERRORS.to_string(),
        ),
    ]
}

fn vue_files(prefix: &str) -> Vec<(String, String)> {
    vec![
        (format!("{prefix}package.json"), VUE_PACKAGE.to_string()),
        (format!("{prefix}index.html"), VUE_INDEX.to_string()),
        (format!("{prefix}vite.config.js"), VUE_VITE_CONFIG.to_string()),
        (format!("{prefix}src/main.js"), VUE_MAIN.to_string()),
        (format!("{prefix}src/App.vue"), VUE_APP.to_string()),
        (format!("{prefix}src/router/index.js"), VUE_ROUTER.to_string()),
        (format!("{prefix}src/views/HomeView.vue"), VUE_HOME.to_string()),
    ]
}

fn replace_file(files: &mut Vec<(String, String)>, path: String, content: &str) {
    match files.iter_mut().find(|(p, _)| *p == path) {
        Some(existing) => existing.1 = content.to_string(),
        None => files.push((path, content.to_string())),
    }
}

/// Relative path → content, with every path under `<name>/`.
fn template_files(kind: &str, name: &str) -> Option<Vec<(String, String)>> {
    let root = format!("{NAME}/");
    let mut files = match kind {
        "express-api" => {
            let mut files = express_files(&root);
            files.push((
                format!("{root}implementation.md"),
                plan("- Express.js API\n- Health check endpoint\n"),
            ));
            files
        }
        "express-api-swagger" => {
            let mut files = express_files(&root);
            replace_file(&mut files, format!("{root}src/app.js"), SWAGGER_APP);
            files.push((format!("{root}swagger.yaml"), SWAGGER_YAML.to_string()));
            files.push((
                format!("{root}implementation.md"),
                plan("- Express.js API\n- Swagger docs at /api-docs\n"),
            ));
            files
        }
        "express-api-mongo" => {
            let mut files = express_files(&root);
            replace_file(&mut files, format!("{root}src/server.js"), MONGO_SERVER);
            replace_file(
                &mut files,
                format!("{root}.env.example"),
                "PORT=3000\nNODE_ENV=development\nMONGO_URI=mongodb://localhost:27017/__NAME__\nJWT_SECRET=changeme\nJWT_EXPIRES_IN=7d\n",
            );
            files.push((format!("{root}src/config/database.js"), MONGO_DATABASE.to_string()));
            files.push((
                format!("{root}src/modules/user/user.model.js"),
                MONGO_USER_MODEL.to_string(),
            ));
            files.push((
                format!("{root}src/middlewares/auth.middleware.js"),
                AUTH_MIDDLEWARE.to_string(),
            ));
            files.push((
                format!("{root}implementation.md"),
                plan("- Express.js API\n- MongoDB via mongoose\n- JWT auth middleware\n"),
            ));
            files
        }
        "vue-app" => {
            let mut files = vue_files(&root);
            files.push((
                format!("{root}implementation.md"),
                plan("- Vue.js 3 App\n- Pinia state management\n- Vue Router\n"),
            ));
            files
        }
        "fullstack" | "fullstack-auth" => {
            let mut files = vec![(format!("{root}package.json"), FULLSTACK_PACKAGE.to_string())];
            files.extend(express_files(&format!("{root}{NAME}-api/")));
            files.extend(vue_files(&format!("{root}{NAME}-ui/")));
            if kind == "fullstack-auth" {
                files.push((
                    format!("{root}{NAME}-api/src/middlewares/auth.middleware.js"),
                    AUTH_MIDDLEWARE.to_string(),
                ));
            }
            files.push((
                format!("{root}implementation.md"),
                plan("- Express.js backend\n- Vue.js 3 frontend\n"),
            ));
            files
        }
        _ => return None,
    };
    files.push((
        format!("{root}README.md"),
        format!("# {NAME}\n\nGenerated `{kind}` project.\n\n```bash\nnpm install\nnpm run dev\n```\n"),
    ));
    Some(
        files
            .into_iter()
            .map(|(path, content)| (path.replace(NAME, name), content.replace(NAME, name)))
            .collect(),
    )
}

fn next_steps(kind: &str, name: &str, flat: bool) -> Vec<String> {
    let install = if kind.starts_with("fullstack") {
        "npm run install:all"
    } else {
        "npm install"
    };
    let mut steps = Vec::new();
    if !flat {
        steps.push(format!("cd {name}"));
    }
    steps.push(install.to_string());
    steps.push("npm run dev".to_string());
    steps
}

pub fn scaffold_project(policy: &PathPolicy, base: &Path, params: &ScaffoldParams) -> Result<Value> {
    let Some(files) = template_files(&params.kind, &params.name) else {
        bail!(
            "Unknown type \"{}\". Use: {}",
            params.kind,
            TEMPLATE_TYPES.join(", ")
        );
    };
    if !name_re().is_match(&params.name) {
        bail!("Invalid project name. Use letters, numbers, hyphens, underscores.");
    }

    let top = format!("{}/", params.name);
    let mut created = Vec::with_capacity(files.len());
    for (rel, content) in files {
        let rel = match rel.strip_prefix(&top) {
            Some(inner) if params.flat => inner.to_string(),
            _ => rel,
        };
        let abs = policy.resolve_writable_in(base, &rel)?;
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&abs, content)?;
        created.push(rel);
    }

    Ok(json!({
        "success": true,
        "type": params.kind,
        "name": params.name,
        "files_created": created,
        "next_steps": next_steps(&params.kind, &params.name, params.flat),
    }))
}
